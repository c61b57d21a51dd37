//! Plugin bundle discovery.
//!
//! A bundle is one directory under the plugin root:
//!
//! ```text
//! <plugin_root>/<bundle_dir>/
//!     config.json      required manifest
//!     <entry file>     required code unit (default init.lua)
//! ```
//!
//! Scanning yields a [`BundleInfo`] per bundle with a readable manifest.
//! Malformed manifests are logged and skipped; they never abort a scan.

use mikro_types::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Manifest file name inside every bundle.
pub const MANIFEST_FILE: &str = "config.json";

/// Default entry file inside a bundle.
pub const DEFAULT_ENTRY: &str = "init.lua";

/// Raw manifest schema (`config.json`).
///
/// Unknown keys are ignored here; plugins read their full manifest back
/// through the facade's `plugin_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Plugin name; falls back to the bundle directory name.
    pub name: Option<String>,
    /// Dotted-integer version string.
    pub version: String,
    /// Requirement strings, e.g. `["core", "store>=1.2"]`.
    pub dependencies: Vec<String>,
    /// Entry file name, relative to the bundle directory.
    pub entry: String,
    /// Free-form description; not consumed by the core.
    pub description: Option<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: None,
            version: "0.0.0".to_string(),
            dependencies: Vec::new(),
            entry: DEFAULT_ENTRY.to_string(),
            description: None,
        }
    }
}

/// One discovered bundle, manifest parsed and version validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    /// Unique plugin name.
    pub name: String,
    /// Bundle directory.
    pub path: PathBuf,
    /// Declared version.
    pub version: Version,
    /// Declared requirement strings, unparsed.
    pub dependencies: Vec<String>,
    /// Entry file name.
    pub entry: String,
}

/// Scans the plugin root and returns one [`BundleInfo`] per valid bundle.
///
/// - A missing root is created (first-run convenience) and yields nothing.
/// - Directory entries are visited in lexicographic name order so the scan
///   order, and everything keyed off it, is deterministic.
/// - A bundle is skipped (with a warning) when its manifest is missing,
///   unreadable, not JSON, or declares an unparseable version.
/// - Duplicate names keep the first bundle seen.
#[must_use]
pub fn scan(root: &Path) -> Vec<BundleInfo> {
    if !root.exists() {
        match std::fs::create_dir_all(root) {
            Ok(()) => info!(root = %root.display(), "created plugin root"),
            Err(e) => warn!(root = %root.display(), error = %e, "cannot create plugin root"),
        }
        return Vec::new();
    }

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "cannot read plugin root");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut seen: HashSet<String> = HashSet::new();
    let mut bundles = Vec::new();
    for dir in dirs {
        let Some(info) = read_bundle(&dir) else {
            continue;
        };
        if !seen.insert(info.name.clone()) {
            warn!(
                name = %info.name,
                path = %dir.display(),
                "duplicate plugin name, keeping the first bundle"
            );
            continue;
        }
        bundles.push(info);
    }
    bundles
}

fn read_bundle(dir: &Path) -> Option<BundleInfo> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return None;
    }

    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "unreadable manifest, skipping bundle");
            return None;
        }
    };

    let manifest: Manifest = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "malformed manifest, skipping bundle");
            return None;
        }
    };

    let version: Version = match manifest.version.parse() {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "bad version in manifest, skipping bundle");
            return None;
        }
    };

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = manifest
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or(dir_name);

    Some(BundleInfo {
        name,
        path: dir.to_path_buf(),
        version,
        dependencies: manifest.dependencies,
        entry: manifest.entry,
    })
}
