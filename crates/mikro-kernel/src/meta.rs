//! Plugin records and the insertion-ordered plugin table.

use crate::api::PluginApi;
use crate::loader::PluginInstance;
use crate::manifest::BundleInfo;
use mikro_types::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// One registered plugin.
///
/// Invariant: `active` holds exactly when `instance`, `api` and
/// `module_key` are all set. Rescans only touch the descriptive fields;
/// `dependencies` of an active plugin is additionally frozen until its
/// next load (updates park in `pending_dependencies`).
pub struct PluginMeta {
    /// Unique plugin name.
    pub name: String,
    /// Bundle directory.
    pub path: PathBuf,
    /// Declared version.
    pub version: Version,
    /// Raw requirement strings in effect for the current lifecycle.
    pub dependencies: Vec<String>,
    /// Entry file name within the bundle.
    pub entry: String,
    /// Dependency update from a rescan while active; applied on unload.
    pub(crate) pending_dependencies: Option<Vec<String>>,
    /// Module cache key of the running code unit.
    pub(crate) module_key: Option<String>,
    /// The live plugin object.
    pub(crate) instance: Option<Arc<dyn PluginInstance>>,
    /// The capability facade bound to this plugin.
    pub(crate) api: Option<Arc<PluginApi>>,
    /// Whether the plugin is running.
    pub active: bool,
}

impl PluginMeta {
    pub(crate) fn from_bundle(bundle: BundleInfo) -> Self {
        Self {
            name: bundle.name,
            path: bundle.path,
            version: bundle.version,
            dependencies: bundle.dependencies,
            entry: bundle.entry,
            pending_dependencies: None,
            module_key: None,
            instance: None,
            api: None,
            active: false,
        }
    }

    /// Clears the runtime fields, applying any parked dependency update.
    pub(crate) fn clear_runtime(&mut self) {
        self.module_key = None;
        self.instance = None;
        self.api = None;
        self.active = false;
        if let Some(deps) = self.pending_dependencies.take() {
            self.dependencies = deps;
        }
    }
}

impl std::fmt::Debug for PluginMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginMeta")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("active", &self.active)
            .finish()
    }
}

/// Listing entry for frontends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    /// Plugin name.
    pub name: String,
    /// Declared version.
    pub version: Version,
    /// Whether the plugin is running.
    pub active: bool,
}

/// Insertion-ordered plugin table.
#[derive(Default)]
pub(crate) struct PluginTable {
    order: Vec<String>,
    map: HashMap<String, PluginMeta>,
}

impl PluginTable {
    pub(crate) fn insert(&mut self, meta: PluginMeta) {
        if !self.map.contains_key(&meta.name) {
            self.order.push(meta.name.clone());
        }
        self.map.insert(meta.name.clone(), meta);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&PluginMeta> {
        self.map.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut PluginMeta> {
        self.map.get_mut(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Iterates records in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &PluginMeta> {
        self.order.iter().filter_map(|name| self.map.get(name))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Keeps only records satisfying the predicate.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&PluginMeta) -> bool) {
        let map = &mut self.map;
        self.order.retain(|name| {
            let keep_it = map.get(name).is_some_and(&mut keep);
            if !keep_it {
                map.remove(name);
            }
            keep_it
        });
    }
}
