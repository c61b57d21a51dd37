//! The `api` table handed to Lua plugin factories.
//!
//! Every function is a Rust closure over the plugin's [`PluginApi`] plus a
//! **weak** handle to the plugin's own Lua state (weak, so the state is
//! reclaimable on unload even though callbacks captured into the kernel
//! registry refer back to it).
//!
//! # Surface
//!
//! | Function | Summary |
//! |----------|---------|
//! | `api.log(msg)` | log line tagged with the plugin name |
//! | `api.is_active()` | `false` once the stop signal is set |
//! | `api.get_plugin_config()` | parsed `config.json`, `{}` on failure |
//! | `api.get_data(key[, scope[, default]])` | scope defaults to `"global"` |
//! | `api.set_data(key, value[, scope])` | scope defaults to `"local"`; returns accepted |
//! | `api.append_data(key, value)` | append to a global list key |
//! | `api.on(event, fn)` | subscribe; `fn(args)` returns the result value |
//! | `api.emit(event[, args])` | async fan-out; returns future handles |
//! | `api.call(event[, args[, timeout_ms]])` | sync fan-out; returns result list |
//! | `api.spawn_task(fn[, opts])` | managed tick task (see below) |
//!
//! `emit` returns an array of futures; each supports
//! `future:wait([timeout_ms]) -> ok, value_or_error`. A plugin must not
//! wait on a future for an event it subscribes to itself: the pool worker
//! would need this plugin's state lock, which the waiting thread holds.
//!
//! # Tasks
//!
//! `api.spawn_task(fn, {interval_ms = 50, name = "ticker", detached = false})`
//! runs `fn()` once per tick on a dedicated thread, re-checking the stop
//! signal between ticks, so a well-behaved task needs no polling of its
//! own. Returning `false` from `fn` ends the task early. A tick that
//! blocks forever still turns the task into a zombie at unload.

use crate::convert::{json_map_to_table, json_to_lua, lua_to_json, table_to_json_map};
use mikro_kernel::{EventFuture, KernelError, PluginApi};
use mikro_types::{ErrorCode, Scope};
use mlua::{Function, Lua, RegistryKey, Table, UserData, UserDataMethods, Value as LuaValue};
use parking_lot::ReentrantMutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;

type WeakLua = Weak<ReentrantMutex<Lua>>;

fn kernel_err(e: KernelError) -> mlua::Error {
    mlua::Error::RuntimeError(format!("{}: {e}", e.code()))
}

fn parse_scope(scope: Option<String>, default: Scope) -> mlua::Result<Scope> {
    match scope {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|e: mikro_types::ScopeParseError| mlua::Error::RuntimeError(e.to_string())),
    }
}

/// Lua-side handle to one [`EventFuture`].
struct LuaEventFuture {
    inner: Option<EventFuture>,
}

impl UserData for LuaEventFuture {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // future:wait([timeout_ms]) -> ok, value_or_error
        methods.add_method_mut("wait", |lua, this, timeout_ms: Option<u64>| {
            let Some(future) = this.inner.take() else {
                return Ok((
                    false,
                    LuaValue::String(lua.create_string("future already consumed")?),
                ));
            };
            let outcome = match timeout_ms {
                None => future.wait(),
                Some(ms) => match future.wait_timeout(Duration::from_millis(ms)) {
                    Ok(outcome) => outcome,
                    Err(pending) => {
                        this.inner = Some(pending);
                        return Ok((false, LuaValue::String(lua.create_string("pending")?)));
                    }
                },
            };
            match outcome {
                Ok(value) => Ok((true, json_to_lua(lua, &value)?)),
                Err(e) => Ok((
                    false,
                    LuaValue::String(lua.create_string(e.to_string())?),
                )),
            }
        });
    }
}

/// Builds the `api` table bound to one plugin.
pub(crate) fn build_api_table(
    lua: &Lua,
    facade: Arc<PluginApi>,
    weak_lua: WeakLua,
) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    // ── api.log(msg) ─────────────────────────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "log",
            lua.create_function(move |_, msg: String| {
                facade.log(&msg);
                Ok(())
            })?,
        )?;
    }

    // ── api.is_active() ──────────────────────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "is_active",
            lua.create_function(move |_, ()| Ok(facade.is_active()))?,
        )?;
    }

    // ── api.get_plugin_config() ──────────────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "get_plugin_config",
            lua.create_function(move |lua, ()| {
                let config = facade.plugin_config();
                json_map_to_table(lua, &config)
            })?,
        )?;
    }

    // ── api.get_data(key[, scope[, default]]) ────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "get_data",
            lua.create_function(
                move |lua, (key, scope, default): (String, Option<String>, Option<LuaValue>)| {
                    let scope = parse_scope(scope, Scope::Global)?;
                    match facade.get_data(&key, scope).map_err(kernel_err)? {
                        Some(value) => json_to_lua(lua, &value),
                        None => Ok(default.unwrap_or(LuaValue::Nil)),
                    }
                },
            )?,
        )?;
    }

    // ── api.set_data(key, value[, scope]) ────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "set_data",
            lua.create_function(
                move |lua, (key, value, scope): (String, LuaValue, Option<String>)| {
                    let scope = parse_scope(scope, Scope::Local)?;
                    let value = lua_to_json(lua, value)?;
                    facade.set_data(&key, value, scope).map_err(kernel_err)
                },
            )?,
        )?;
    }

    // ── api.append_data(key, value) ──────────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "append_data",
            lua.create_function(move |lua, (key, value): (String, LuaValue)| {
                let value = lua_to_json(lua, value)?;
                facade.append_data(&key, value).map_err(kernel_err)
            })?,
        )?;
    }

    // ── api.on(event, fn) ────────────────────────────────────
    {
        let facade = Arc::clone(&facade);
        let weak = weak_lua.clone();
        api.set(
            "on",
            lua.create_function(move |lua, (event, callback): (String, Function)| {
                let key = Arc::new(lua.create_registry_value(callback)?);
                let callback = lua_callback(weak.clone(), key);
                facade.on(&event, callback).map_err(kernel_err)
            })?,
        )?;
    }

    // ── api.emit(event[, args]) ──────────────────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "emit",
            lua.create_function(move |lua, (event, args): (String, Option<Table>)| {
                let args = table_to_json_map(lua, args)?;
                let futures = facade.emit(&event, args).map_err(kernel_err)?;
                let out = lua.create_table_with_capacity(futures.len(), 0)?;
                for (i, future) in futures.into_iter().enumerate() {
                    out.raw_set(i + 1, LuaEventFuture { inner: Some(future) })?;
                }
                Ok(out)
            })?,
        )?;
    }

    // ── api.call(event[, args[, timeout_ms]]) ────────────────
    {
        let facade = Arc::clone(&facade);
        api.set(
            "call",
            lua.create_function(
                move |lua, (event, args, timeout_ms): (String, Option<Table>, Option<u64>)| {
                    let args = table_to_json_map(lua, args)?;
                    let timeout = timeout_ms.map(Duration::from_millis);
                    let results = facade.call(&event, args, timeout).map_err(kernel_err)?;
                    let out = lua.create_table_with_capacity(results.len(), 0)?;
                    for (i, result) in results.into_iter().enumerate() {
                        let entry = lua.create_table()?;
                        match result {
                            Ok(value) => {
                                entry.set("ok", true)?;
                                entry.set("value", json_to_lua(lua, &value)?)?;
                            }
                            Err(e) => {
                                entry.set("ok", false)?;
                                entry.set("error", e.to_string())?;
                            }
                        }
                        out.raw_set(i + 1, entry)?;
                    }
                    Ok(out)
                },
            )?,
        )?;
    }

    // ── api.spawn_task(fn[, opts]) ───────────────────────────
    {
        let facade = Arc::clone(&facade);
        let weak = weak_lua.clone();
        api.set(
            "spawn_task",
            lua.create_function(move |lua, (tick, opts): (Function, Option<Table>)| {
                let (interval_ms, name, detached) = match &opts {
                    Some(t) => (
                        t.get::<Option<u64>>("interval_ms")?.unwrap_or(50),
                        t.get::<Option<String>>("name")?,
                        t.get::<Option<bool>>("detached")?.unwrap_or(false),
                    ),
                    None => (50, None, false),
                };
                let name = name.unwrap_or_else(|| "tick".to_string());
                let key = Arc::new(lua.create_registry_value(tick)?);
                let task = tick_loop(
                    weak.clone(),
                    key,
                    facade.stop_signal(),
                    Duration::from_millis(interval_ms),
                    facade.plugin_name().to_string(),
                );
                facade
                    .spawn_task(&name, detached, task)
                    .map_err(kernel_err)
            })?,
        )?;
    }

    Ok(api)
}

/// Bridges a Lua function into a kernel [`Callback`].
///
/// [`Callback`]: mikro_kernel::Callback
fn lua_callback(weak: WeakLua, key: Arc<RegistryKey>) -> mikro_kernel::Callback {
    Arc::new(move |args| {
        let Some(lua) = weak.upgrade() else {
            return Err("plugin module unloaded".to_string());
        };
        let guard = lua.lock();
        let callback: Function = guard
            .registry_value(&key)
            .map_err(|e| format!("callback lookup failed: {e}"))?;
        let table = json_map_to_table(&guard, args).map_err(|e| e.to_string())?;
        let result: LuaValue = callback.call(table).map_err(|e| e.to_string())?;
        lua_to_json(&guard, result).map_err(|e| e.to_string())
    })
}

/// Builds the host-side tick loop for `api.spawn_task`.
///
/// The loop re-checks the stop signal between ticks and never holds the
/// plugin's state lock across a sleep.
fn tick_loop(
    weak: WeakLua,
    key: Arc<RegistryKey>,
    stop: Arc<mikro_kernel::StopSignal>,
    interval: Duration,
    plugin: String,
) -> impl FnOnce() + Send + 'static {
    move || {
        while !stop.is_set() {
            let Some(lua) = weak.upgrade() else {
                break;
            };
            let keep_going = {
                let guard = lua.lock();
                let tick: Function = match guard.registry_value(&key) {
                    Ok(f) => f,
                    Err(_) => break,
                };
                match tick.call::<Option<bool>>(()) {
                    Ok(Some(false)) => false,
                    Ok(_) => true,
                    Err(e) => {
                        warn!(plugin = %plugin, error = %e, "task tick failed, stopping task");
                        false
                    }
                }
            };
            drop(lua);
            if !keep_going {
                break;
            }
            std::thread::sleep(interval);
        }
    }
}
