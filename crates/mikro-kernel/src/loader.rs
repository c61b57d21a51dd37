//! Dynamic code loading seam and the module cache.
//!
//! The kernel never touches a scripting runtime directly; it drives a
//! [`BundleLoader`] that turns an entry file plus a facade into a live
//! [`PluginInstance`] and an opaque module handle. Handles are cached
//! under kernel-private identifiers (`mk_plugin_<name>#<generation>`) so
//! reloads always execute fresh code and unloads can release the unit.

use crate::api::PluginApi;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error from a plugin's `start()` or `stop()`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PluginCallError(pub String);

impl From<crate::error::KernelError> for PluginCallError {
    fn from(e: crate::error::KernelError) -> Self {
        Self(e.to_string())
    }
}

/// A live plugin object.
///
/// Implementations wrap whatever the loader produced (a Lua table, a
/// native struct) behind the two lifecycle calls the supervisor drives.
/// Both run on watched threads, so implementations must be `Send + Sync`.
pub trait PluginInstance: Send + Sync {
    /// Called once when the plugin is loaded.
    fn start(&self) -> Result<(), PluginCallError>;

    /// Called once when the plugin is unloaded. Faults are logged by the
    /// supervisor and never abort the unload sequence.
    fn stop(&self) -> Result<(), PluginCallError>;
}

/// What a loader hands back for one bundle.
pub struct LoadedBundle {
    /// Opaque handle keeping the code unit alive; cached by the kernel
    /// and dropped on unload.
    pub module: Box<dyn Any + Send + Sync>,
    /// The instantiated plugin.
    pub instance: Arc<dyn PluginInstance>,
}

/// Loader failure (import error, contract violation, ...).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LoadError(pub String);

/// Turns an entry file into a running code unit.
pub trait BundleLoader: Send + Sync {
    /// Executes `entry` and instantiates its plugin against `api`.
    fn load(&self, entry: &std::path::Path, api: Arc<PluginApi>)
        -> Result<LoadedBundle, LoadError>;
}

/// Builds the kernel-private cache identifier for one load.
#[must_use]
pub fn module_key(plugin: &str, generation: u64) -> String {
    format!("mk_plugin_{plugin}#{generation}")
}

/// Versioned module cache.
///
/// Keyed by [`module_key`]; the generation suffix prevents cache
/// collisions across reloads of the same plugin name.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ModuleRegistry {
    /// Installs a module under its key.
    pub fn insert(&mut self, key: String, module: Box<dyn Any + Send + Sync>) {
        debug!(key = %key, "module cached");
        self.entries.insert(key, module);
    }

    /// Removes every entry tagged with `plugin` (any generation).
    /// Returns the number removed.
    pub fn remove_tagged(&mut self, plugin: &str) -> usize {
        let prefix = format!("mk_plugin_{plugin}#");
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(plugin, removed, "module cache entries released");
        }
        removed
    }

    /// Whether a key is cached.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
