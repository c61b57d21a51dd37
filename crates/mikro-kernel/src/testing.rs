//! Test doubles for kernel consumers.
//!
//! [`ScriptedLoader`] stands in for a real code-unit loader: tests
//! describe each plugin's `start`/`stop` behavior with closures, and the
//! hooks receive the live facade, which is how tests get their hands on a
//! `PluginApi` without widening the kernel surface.

use crate::api::PluginApi;
use crate::loader::{BundleLoader, LoadError, LoadedBundle, PluginCallError, PluginInstance};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Hook invoked with the plugin's facade.
pub type LifecycleHook =
    Arc<dyn Fn(&Arc<PluginApi>) -> Result<(), PluginCallError> + Send + Sync>;

/// Scripted behavior for one plugin.
#[derive(Clone, Default)]
pub struct ScriptedBundle {
    /// Runs inside `start()`; defaults to success.
    pub on_start: Option<LifecycleHook>,
    /// Runs inside `stop()`; defaults to success.
    pub on_stop: Option<LifecycleHook>,
    /// When set, `load` itself fails with this message.
    pub fail_load: Option<String>,
}

struct ScriptedInstance {
    api: Arc<PluginApi>,
    bundle: ScriptedBundle,
}

impl PluginInstance for ScriptedInstance {
    fn start(&self) -> Result<(), PluginCallError> {
        match &self.bundle.on_start {
            Some(hook) => hook(&self.api),
            None => Ok(()),
        }
    }

    fn stop(&self) -> Result<(), PluginCallError> {
        match &self.bundle.on_stop {
            Some(hook) => hook(&self.api),
            None => Ok(()),
        }
    }
}

/// [`BundleLoader`] whose plugins are scripted in the test.
///
/// Unscripted plugins load successfully and do nothing.
#[derive(Default)]
pub struct ScriptedLoader {
    bundles: Mutex<HashMap<String, ScriptedBundle>>,
}

impl ScriptedLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts one plugin.
    pub fn script(&self, name: &str, bundle: ScriptedBundle) {
        self.bundles.lock().insert(name.to_string(), bundle);
    }

    /// Scripts just the start hook.
    pub fn on_start(
        &self,
        name: &str,
        hook: impl Fn(&Arc<PluginApi>) -> Result<(), PluginCallError> + Send + Sync + 'static,
    ) {
        let mut bundles = self.bundles.lock();
        bundles.entry(name.to_string()).or_default().on_start = Some(Arc::new(hook));
    }

    /// Scripts just the stop hook.
    pub fn on_stop(
        &self,
        name: &str,
        hook: impl Fn(&Arc<PluginApi>) -> Result<(), PluginCallError> + Send + Sync + 'static,
    ) {
        let mut bundles = self.bundles.lock();
        bundles.entry(name.to_string()).or_default().on_stop = Some(Arc::new(hook));
    }

    /// Makes `load` fail for one plugin.
    pub fn fail_load(&self, name: &str, reason: &str) {
        let mut bundles = self.bundles.lock();
        bundles.entry(name.to_string()).or_default().fail_load = Some(reason.to_string());
    }
}

impl BundleLoader for Arc<ScriptedLoader> {
    fn load(&self, entry: &Path, api: Arc<PluginApi>) -> Result<LoadedBundle, LoadError> {
        let _ = entry;
        let name = api.plugin_name().to_string();
        let bundle = self
            .bundles
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or_default();
        if let Some(reason) = &bundle.fail_load {
            return Err(LoadError(reason.clone()));
        }
        Ok(LoadedBundle {
            module: Box::new(()),
            instance: Arc::new(ScriptedInstance { api, bundle }),
        })
    }
}

/// Writes a bundle directory with a manifest and an empty entry file.
pub fn write_bundle(root: &Path, name: &str, version: &str, deps: &[&str]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create bundle dir");
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "dependencies": deps,
    });
    std::fs::write(
        dir.join(crate::manifest::MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest).expect("serialize manifest"),
    )
    .expect("write manifest");
    std::fs::write(dir.join("init.lua"), "").expect("write entry");
}
