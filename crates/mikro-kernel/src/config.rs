//! Kernel configuration.
//!
//! [`KernelConfig`] gathers every tunable the supervisor, registry, and
//! worker pool consume. All fields have compile-time defaults; frontends
//! may deserialize a config file over them and then apply flag overrides.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Write-protection policy for global store keys.
///
/// Global writes whose key matches the policy are rejected (logged, never
/// raised). The policy is part of the contract plugins see; the default
/// protects exactly `{"admin"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "keys", rename_all = "lowercase")]
pub enum ProtectedKeys {
    /// Reject exactly the listed keys.
    Exact(BTreeSet<String>),
    /// Reject every key starting with the given prefix, e.g. `kernel_`.
    Prefix(String),
}

impl ProtectedKeys {
    /// Returns `true` when a global write to `key` must be rejected.
    #[must_use]
    pub fn is_protected(&self, key: &str) -> bool {
        match self {
            Self::Exact(set) => set.contains(key),
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl Default for ProtectedKeys {
    fn default() -> Self {
        Self::Exact(BTreeSet::from(["admin".to_string()]))
    }
}

/// Kernel tunables.
///
/// # Example
///
/// ```
/// use mikro_kernel::KernelConfig;
/// use std::time::Duration;
///
/// let config = KernelConfig::default()
///     .with_plugin_root("bundles")
///     .with_start_timeout(Duration::from_millis(500));
/// assert_eq!(config.worker_pool_size, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Directory scanned for plugin bundles.
    pub plugin_root: PathBuf,

    /// Threads in the asynchronous event fan-out pool.
    pub worker_pool_size: usize,

    /// Bounded wait for a plugin's `start()`.
    #[serde(with = "duration_ms", rename = "start_timeout_ms")]
    pub start_timeout: Duration,

    /// Bounded wait for a plugin's `stop()`.
    #[serde(with = "duration_ms", rename = "stop_timeout_ms")]
    pub stop_timeout: Duration,

    /// Per-task grace when joining managed tasks during cleanup.
    #[serde(with = "duration_ms", rename = "task_grace_ms")]
    pub task_grace: Duration,

    /// Write-protection policy for global store keys.
    pub protected_keys: ProtectedKeys,

    /// Initial contents of the global store.
    pub seed: Map<String, Value>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let mut seed = Map::new();
        seed.insert(
            "version".to_string(),
            Value::String(env!("CARGO_PKG_VERSION").to_string()),
        );
        seed.insert(
            "admin".to_string(),
            Value::String("Administrator".to_string()),
        );
        seed.insert("data".to_string(), Value::Array(Vec::new()));

        Self {
            plugin_root: PathBuf::from("plugins"),
            worker_pool_size: 5,
            start_timeout: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(2),
            task_grace: Duration::from_secs(1),
            protected_keys: ProtectedKeys::default(),
            seed,
        }
    }
}

impl KernelConfig {
    /// Sets the plugin root directory.
    #[must_use]
    pub fn with_plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugin_root = root.into();
        self
    }

    /// Sets the worker pool size (clamped to at least one worker).
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    /// Sets the bounded wait for `start()`.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the bounded wait for `stop()`.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the per-task join grace.
    #[must_use]
    pub fn with_task_grace(mut self, grace: Duration) -> Self {
        self.task_grace = grace;
        self
    }

    /// Sets the protected-key policy.
    #[must_use]
    pub fn with_protected_keys(mut self, policy: ProtectedKeys) -> Self {
        self.protected_keys = policy;
        self
    }

    /// Adds or replaces one seeded global value.
    #[must_use]
    pub fn with_seed_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.seed.insert(key.into(), value);
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
