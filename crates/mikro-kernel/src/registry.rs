//! State & event registry.
//!
//! One `parking_lot::Mutex` guards both halves: the scoped key-value store
//! and the owner-tagged subscription table. Nothing ever executes a plugin
//! callback while the lock is held; dispatch works on snapshots taken under
//! the lock (see the supervisor's `emit`/`call`).

use crate::config::ProtectedKeys;
use mikro_types::Scope;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keyword-style event arguments.
pub type EventArgs = Map<String, Value>;

/// Subscriber callback.
///
/// Callbacks run outside the registry lock, possibly on a pool worker, so
/// they must be `Send + Sync`. Errors are reported as strings and reified
/// by the dispatcher; they never propagate to sibling subscribers.
pub type Callback = Arc<dyn Fn(&EventArgs) -> Result<Value, String> + Send + Sync>;

/// One owner-tagged event subscription.
#[derive(Clone)]
pub struct Subscription {
    /// Event name.
    pub event: String,
    /// Owning plugin; used for bulk removal on unload.
    pub owner: String,
    /// The callback itself.
    pub callback: Callback,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    globals: Map<String, Value>,
    locals: HashMap<String, Map<String, Value>>,
    subs: HashMap<String, Vec<Subscription>>,
}

/// Thread-safe store for scoped data and event subscriptions.
pub struct Registry {
    protected: ProtectedKeys,
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Creates a registry with the given protection policy and seeded
    /// global values.
    #[must_use]
    pub fn new(protected: ProtectedKeys, seed: Map<String, Value>) -> Self {
        Self {
            protected,
            inner: Mutex::new(RegistryInner {
                globals: seed,
                ..RegistryInner::default()
            }),
        }
    }

    // ── Scoped data ──────────────────────────────────────────

    /// Reads a key; `None` when absent.
    #[must_use]
    pub fn get(&self, caller: &str, key: &str, scope: Scope) -> Option<Value> {
        let inner = self.inner.lock();
        match scope {
            Scope::Global => inner.globals.get(key).cloned(),
            Scope::Local => inner
                .locals
                .get(caller)
                .and_then(|map| map.get(key))
                .cloned(),
        }
    }

    /// Writes a key. Returns `false` when a protected global key rejected
    /// the write; rejections are logged, never raised.
    pub fn set(&self, caller: &str, key: &str, value: Value, scope: Scope) -> bool {
        let mut inner = self.inner.lock();
        match scope {
            Scope::Global => {
                if self.protected.is_protected(key) {
                    warn!(caller, key, "write to protected global key rejected");
                    return false;
                }
                inner.globals.insert(key.to_string(), value);
            }
            Scope::Local => {
                inner
                    .locals
                    .entry(caller.to_string())
                    .or_default()
                    .insert(key.to_string(), value);
            }
        }
        true
    }

    /// Appends to a list-valued global key, creating `[value]` when the
    /// key is absent. Returns `false` (logged) when the existing value is
    /// not a list or the key is protected.
    pub fn append_global(&self, caller: &str, key: &str, value: Value) -> bool {
        if self.protected.is_protected(key) {
            warn!(caller, key, "append to protected global key rejected");
            return false;
        }
        let mut inner = self.inner.lock();
        match inner.globals.get_mut(key) {
            None => {
                inner.globals.insert(key.to_string(), Value::Array(vec![value]));
                true
            }
            Some(Value::Array(items)) => {
                items.push(value);
                true
            }
            Some(_) => {
                warn!(caller, key, "append target is not a list");
                false
            }
        }
    }

    /// Drops a plugin's entire local submap.
    pub fn drop_local(&self, plugin: &str) {
        if self.inner.lock().locals.remove(plugin).is_some() {
            debug!(plugin, "dropped local scope");
        }
    }

    /// Snapshot of the global store, for inspection surfaces.
    #[must_use]
    pub fn globals_snapshot(&self) -> Map<String, Value> {
        self.inner.lock().globals.clone()
    }

    // ── Subscriptions ────────────────────────────────────────

    /// Appends a subscription to its event bucket.
    pub fn register(&self, sub: Subscription) {
        debug!(event = %sub.event, owner = %sub.owner, "subscription registered");
        self.inner
            .lock()
            .subs
            .entry(sub.event.clone())
            .or_default()
            .push(sub);
    }

    /// Removes every subscription owned by `owner`, across all events.
    /// Empty buckets are dropped. Returns the number removed.
    pub fn unregister_by_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        inner.subs.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|sub| sub.owner != owner);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        if removed > 0 {
            debug!(owner, removed, "subscriptions unregistered");
        }
        removed
    }

    /// Shallow copy of an event's bucket, in subscription order.
    ///
    /// Dispatch works exclusively on these snapshots: mutations to the
    /// bucket during a fan-out never affect the in-flight batch.
    #[must_use]
    pub fn snapshot(&self, event: &str) -> Vec<Subscription> {
        self.inner
            .lock()
            .subs
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live subscriptions for an event.
    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner.lock().subs.get(event).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new(ProtectedKeys::default(), Map::new())
    }

    fn sub(event: &str, owner: &str) -> Subscription {
        Subscription {
            event: event.to_string(),
            owner: owner.to_string(),
            callback: Arc::new(|_| Ok(Value::Null)),
        }
    }

    #[test]
    fn global_set_get() {
        let reg = registry();
        assert!(reg.set("p1", "answer", json!(42), Scope::Global));
        assert_eq!(reg.get("p2", "answer", Scope::Global), Some(json!(42)));
        assert_eq!(reg.get("p2", "missing", Scope::Global), None);
    }

    #[test]
    fn local_scope_is_per_plugin() {
        let reg = registry();
        assert!(reg.set("p1", "k", json!("mine"), Scope::Local));
        assert_eq!(reg.get("p1", "k", Scope::Local), Some(json!("mine")));
        assert_eq!(reg.get("p2", "k", Scope::Local), None);
    }

    #[test]
    fn protected_global_write_rejected_value_unchanged() {
        let mut seed = Map::new();
        seed.insert("admin".to_string(), json!("root"));
        let reg = Registry::new(ProtectedKeys::default(), seed);

        assert!(!reg.set("p1", "admin", json!("intruder"), Scope::Global));
        assert_eq!(reg.get("p1", "admin", Scope::Global), Some(json!("root")));
    }

    #[test]
    fn protected_key_allowed_in_local_scope() {
        let reg = registry();
        assert!(reg.set("p1", "admin", json!("mine"), Scope::Local));
        assert_eq!(reg.get("p1", "admin", Scope::Local), Some(json!("mine")));
    }

    #[test]
    fn prefix_policy_rejects_matching_globals() {
        let reg = Registry::new(ProtectedKeys::Prefix("kernel_".into()), Map::new());
        assert!(!reg.set("p1", "kernel_mode", json!(1), Scope::Global));
        assert!(reg.set("p1", "mode", json!(1), Scope::Global));
    }

    #[test]
    fn append_creates_then_extends() {
        let reg = registry();
        assert!(reg.append_global("p1", "data", json!("a")));
        assert!(reg.append_global("p1", "data", json!("b")));
        assert_eq!(
            reg.get("p1", "data", Scope::Global),
            Some(json!(["a", "b"]))
        );
    }

    #[test]
    fn append_to_non_list_rejected() {
        let reg = registry();
        reg.set("p1", "scalar", json!(7), Scope::Global);
        assert!(!reg.append_global("p1", "scalar", json!("x")));
        assert_eq!(reg.get("p1", "scalar", Scope::Global), Some(json!(7)));
    }

    #[test]
    fn drop_local_removes_submap() {
        let reg = registry();
        reg.set("p1", "k", json!(1), Scope::Local);
        reg.drop_local("p1");
        assert_eq!(reg.get("p1", "k", Scope::Local), None);
    }

    #[test]
    fn unregister_by_owner_spans_events() {
        let reg = registry();
        reg.register(sub("e1", "p1"));
        reg.register(sub("e1", "p2"));
        reg.register(sub("e2", "p1"));

        assert_eq!(reg.unregister_by_owner("p1"), 2);
        assert_eq!(reg.subscriber_count("e1"), 1);
        assert_eq!(reg.subscriber_count("e2"), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let reg = registry();
        reg.register(sub("e", "p1"));
        let snap = reg.snapshot("e");
        reg.register(sub("e", "p2"));
        assert_eq!(snap.len(), 1);
        assert_eq!(reg.snapshot("e").len(), 2);
    }

    #[test]
    fn snapshot_preserves_subscription_order() {
        let reg = registry();
        reg.register(sub("e", "first"));
        reg.register(sub("e", "second"));
        reg.register(sub("e", "third"));
        let owners: Vec<_> = reg.snapshot("e").into_iter().map(|s| s.owner).collect();
        assert_eq!(owners, vec!["first", "second", "third"]);
    }
}
