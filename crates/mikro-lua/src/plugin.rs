//! The live Lua plugin object.

use mikro_kernel::{PluginCallError, PluginInstance};
use mlua::{Function, Lua, RegistryKey};
use parking_lot::ReentrantMutex;
use std::sync::Arc;

/// A plugin instantiated from a Lua bundle.
///
/// Holds the plugin's `start`/`stop` functions as registry keys into its
/// own Lua state. The state lock is re-entrant so inline event dispatch
/// may call back into the plugin that initiated it from the same thread.
pub struct LuaPlugin {
    lua: Arc<ReentrantMutex<Lua>>,
    start_key: RegistryKey,
    stop_key: RegistryKey,
}

impl LuaPlugin {
    pub(crate) fn new(
        lua: Arc<ReentrantMutex<Lua>>,
        start_key: RegistryKey,
        stop_key: RegistryKey,
    ) -> Self {
        Self {
            lua,
            start_key,
            stop_key,
        }
    }

    fn invoke(&self, key: &RegistryKey, which: &str) -> Result<(), PluginCallError> {
        let lua = self.lua.lock();
        let func: Function = lua
            .registry_value(key)
            .map_err(|e| PluginCallError(format!("{which}() lookup failed: {e}")))?;
        func.call::<()>(())
            .map_err(|e| PluginCallError(e.to_string()))
    }
}

impl PluginInstance for LuaPlugin {
    fn start(&self) -> Result<(), PluginCallError> {
        self.invoke(&self.start_key, "start")
    }

    fn stop(&self) -> Result<(), PluginCallError> {
        self.invoke(&self.stop_key, "stop")
    }
}
