//! Lua bundle loader.
//!
//! Loading a bundle: fresh Lua state → harden globals → wire `require`
//! to the bundle directory → execute the entry chunk → fetch the global
//! `Plugin` factory → call it with the `api` table → pin the returned
//! `start`/`stop` functions in the registry.
//!
//! Each load gets its own state, so a reload always executes the code
//! currently on disk; the kernel's module cache holds the state alive
//! and dropping the cache entry (plus the instance) reclaims it.

use crate::api::build_api_table;
use crate::error::HostError;
use crate::plugin::LuaPlugin;
use mikro_kernel::{BundleLoader, LoadError, LoadedBundle, PluginApi};
use mlua::{Function, Lua, Table, Value as LuaValue};
use parking_lot::ReentrantMutex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// [`BundleLoader`] for Lua plugin bundles.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaBundleLoader;

impl LuaBundleLoader {
    /// Creates the loader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn load_inner(&self, entry: &Path, api: Arc<PluginApi>) -> Result<LoadedBundle, HostError> {
        if !entry.is_file() {
            return Err(HostError::EntryMissing(entry.to_path_buf()));
        }
        let source = std::fs::read_to_string(entry)?;

        let lua = Lua::new();
        harden(&lua)?;
        if let Some(dir) = entry.parent() {
            set_module_path(&lua, dir)?;
        }

        let lua = Arc::new(ReentrantMutex::new(lua));
        let (start_key, stop_key) = {
            let guard = lua.lock();
            let api_table = build_api_table(&guard, Arc::clone(&api), Arc::downgrade(&lua))?;

            guard
                .load(&source)
                .set_name(entry.display().to_string())
                .exec()?;

            let factory: Function = guard.globals().get::<Function>("Plugin").map_err(|_| {
                HostError::Contract("entry file does not define a Plugin factory".to_string())
            })?;

            let produced: LuaValue = factory.call(api_table)?;
            let LuaValue::Table(plugin) = produced else {
                return Err(HostError::Contract(
                    "Plugin factory must return a table".to_string(),
                ));
            };

            let start: Function = plugin.get::<Function>("start").map_err(|_| {
                HostError::Contract("plugin object has no start() function".to_string())
            })?;
            let stop: Function = plugin.get::<Function>("stop").map_err(|_| {
                HostError::Contract("plugin object has no stop() function".to_string())
            })?;

            (
                guard.create_registry_value(start)?,
                guard.create_registry_value(stop)?,
            )
        };

        debug!(plugin = api.plugin_name(), entry = %entry.display(), "lua bundle loaded");
        let instance = Arc::new(LuaPlugin::new(Arc::clone(&lua), start_key, stop_key));
        Ok(LoadedBundle {
            module: Box::new(lua),
            instance,
        })
    }
}

impl BundleLoader for LuaBundleLoader {
    fn load(&self, entry: &Path, api: Arc<PluginApi>) -> Result<LoadedBundle, LoadError> {
        self.load_inner(entry, api).map_err(|e| LoadError(e.to_string()))
    }
}

/// Strips the escape hatches out of a fresh state.
///
/// The pre-load audit already refuses bundles that mention these; this
/// removes them outright so a pattern the audit missed still has nothing
/// to call. Time and formatting stay available.
fn harden(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["io", "dofile", "loadfile", "load", "loadstring"] {
        globals.set(name, LuaValue::Nil)?;
    }
    if let Ok(os_table) = globals.get::<Table>("os") {
        for name in ["execute", "exit", "remove", "rename", "tmpname", "getenv"] {
            os_table.set(name, LuaValue::Nil)?;
        }
    }
    Ok(())
}

/// Points `require` at the bundle directory so co-located modules
/// resolve (`require("lib.helper")` → `<bundle>/lib/helper.lua`).
fn set_module_path(lua: &Lua, dir: &Path) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let path = format!("{0}/?.lua;{0}/?/init.lua", dir.display());
    package.set("path", path)?;
    Ok(())
}
