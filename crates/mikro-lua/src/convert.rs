//! Value conversions between JSON and Lua.
//!
//! Conversions are structural, never via source-text round trips. Lua
//! tables with a positive raw length convert to JSON arrays; everything
//! else string-keyed converts to objects.

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::{Map, Value as JsonValue};

/// Converts a JSON value into a Lua value.
pub fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<LuaValue> {
    match value {
        JsonValue::Null => Ok(LuaValue::Nil),
        JsonValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::Number(f))
            } else {
                Err(mlua::Error::runtime(format!(
                    "unrepresentable number {n}"
                )))
            }
        }
        JsonValue::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        JsonValue::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        JsonValue::Object(map) => Ok(LuaValue::Table(json_map_to_table(lua, map)?)),
    }
}

/// Converts a JSON object into a Lua table.
pub fn json_map_to_table(lua: &Lua, map: &Map<String, JsonValue>) -> mlua::Result<Table> {
    let table = lua.create_table_with_capacity(0, map.len())?;
    for (key, value) in map {
        table.set(key.as_str(), json_to_lua(lua, value)?)?;
    }
    Ok(table)
}

/// Converts a Lua value into JSON.
///
/// Functions, userdata, and other non-data values are rejected.
pub fn lua_to_json(lua: &Lua, value: LuaValue) -> mlua::Result<JsonValue> {
    match value {
        LuaValue::Nil => Ok(JsonValue::Null),
        LuaValue::Boolean(b) => Ok(JsonValue::Bool(b)),
        LuaValue::Integer(i) => Ok(JsonValue::Number(i.into())),
        LuaValue::Number(n) => serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .ok_or_else(|| mlua::Error::runtime(format!("non-finite number {n}"))),
        LuaValue::String(s) => Ok(JsonValue::String(s.to_str()?.to_string())),
        LuaValue::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: LuaValue = table.raw_get(i)?;
                    items.push(lua_to_json(lua, item)?);
                }
                Ok(JsonValue::Array(items))
            } else {
                let mut map = Map::new();
                for pair in table.pairs::<String, LuaValue>() {
                    let (key, item) = pair?;
                    map.insert(key, lua_to_json(lua, item)?);
                }
                Ok(JsonValue::Object(map))
            }
        }
        other => Err(mlua::Error::runtime(format!(
            "unsupported lua type {}",
            other.type_name()
        ))),
    }
}

/// Converts an optional Lua table of keyword arguments into a JSON map.
pub fn table_to_json_map(lua: &Lua, table: Option<Table>) -> mlua::Result<Map<String, JsonValue>> {
    let Some(table) = table else {
        return Ok(Map::new());
    };
    let mut map = Map::new();
    for pair in table.pairs::<String, LuaValue>() {
        let (key, value) = pair?;
        map.insert(key, lua_to_json(lua, value)?);
    }
    Ok(map)
}
