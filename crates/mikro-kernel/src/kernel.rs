//! Lifecycle supervisor.
//!
//! [`Kernel`] orchestrates the whole plugin lifecycle:
//!
//! ```text
//! Discovered ──load──► Active ──unload──► Unloaded
//!      │                  ▲ │
//!      │   (audit,        │ └─reload: cascade over reverse deps
//!      │    start watch)  │
//!      └──► Failed/TimedOut ──rollback──► Unloaded
//! ```
//!
//! [`KernelShared`] is the slice of the kernel that facades reach through
//! their weak back-reference: configuration, the state & event registry,
//! and the fan-out worker pool. The supervisor keeps the only strong
//! handle; on shutdown the `alive` flag flips and stray facade calls fail
//! with a kernel-gone error instead of touching dead state.
//!
//! The kernel is a supervisor in the fault-tolerance sense: plugin
//! misbehavior (start faults, stop overruns, callback panics, stubborn
//! tasks) is contained, logged, and never brings the process down.

use crate::api::PluginApi;
use crate::audit::AuditHook;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::loader::{module_key, BundleLoader, ModuleRegistry, PluginInstance};
use crate::manifest;
use crate::meta::{PluginMeta, PluginStatus, PluginTable};
use crate::pool::{panic_message, CallbackError, EventFuture, WorkerPool};
use crate::registry::{EventArgs, Registry};
use crate::resolver::{self, Resolution, ResolveError, ResolveNode};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Kernel state reachable from plugin facades.
pub struct KernelShared {
    config: KernelConfig,
    registry: Registry,
    pool: WorkerPool,
    alive: AtomicBool,
}

impl KernelShared {
    pub(crate) fn new(config: KernelConfig) -> Arc<Self> {
        let registry = Registry::new(config.protected_keys.clone(), config.seed.clone());
        let pool = WorkerPool::new(config.worker_pool_size);
        Arc::new(Self {
            config,
            registry,
            pool,
            alive: AtomicBool::new(true),
        })
    }

    /// The kernel configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The state & event registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn mark_shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pool.shutdown();
    }

    /// Asynchronous fan-out.
    ///
    /// Snapshots the event's subscribers under the registry lock, then
    /// submits one pool job per subscription in subscription order.
    /// Returns the result futures in the same order; completion order is
    /// unspecified. Never blocks the caller.
    #[must_use]
    pub fn emit(&self, event: &str, args: EventArgs) -> Vec<EventFuture> {
        let snapshot = self.registry.snapshot(event);
        debug!(event, subscribers = snapshot.len(), "async fan-out");
        let args = Arc::new(args);

        snapshot
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel();
                let future = EventFuture::new(sub.event.clone(), sub.owner.clone(), rx);
                let args = Arc::clone(&args);
                let callback = sub.callback;
                let submitted = self.pool.submit(Box::new(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| callback(&args)));
                    let result = match outcome {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(message)) => Err(CallbackError::Failed(message)),
                        Err(payload) => Err(CallbackError::Panicked(panic_message(payload))),
                    };
                    let _ = tx.send(result);
                }));
                if !submitted {
                    debug!(event, "worker pool unavailable, dispatch canceled");
                }
                future
            })
            .collect()
    }

    /// Synchronous fan-out, inline on the calling thread.
    ///
    /// Same snapshot step as [`emit`](Self::emit), but every callback runs
    /// in subscription order on this thread — never on the pool, so a
    /// subscriber issuing a nested `call` cannot exhaust the workers.
    /// Callback faults are reified into their result slot; siblings run
    /// regardless. The timeout is advisory for the aggregate: subscribers
    /// not yet invoked when it passes get a timeout result, but a running
    /// callback is never interrupted.
    #[must_use]
    pub fn call(
        &self,
        event: &str,
        args: EventArgs,
        timeout: Option<Duration>,
    ) -> Vec<Result<Value, CallbackError>> {
        let snapshot = self.registry.snapshot(event);
        debug!(event, subscribers = snapshot.len(), "sync fan-out");
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut results = Vec::with_capacity(snapshot.len());
        for sub in snapshot {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(event, owner = %sub.owner, "deadline passed before subscriber ran");
                results.push(Err(CallbackError::Timeout));
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.callback)(&args)));
            results.push(match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(CallbackError::Failed(message)),
                Err(payload) => Err(CallbackError::Panicked(panic_message(payload))),
            });
        }
        results
    }
}

/// Summary of an [`init`](Kernel::init) pass.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Plugins brought up, in load order.
    pub loaded: Vec<String>,
    /// Plugins that reached the load step and failed.
    pub failed: Vec<(String, KernelError)>,
    /// Plugins the resolver excluded, one error each.
    pub excluded: Vec<ResolveError>,
}

impl InitReport {
    /// `true` when every registered plugin came up.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.excluded.is_empty()
    }
}

enum WatchedOutcome {
    Completed(Result<(), crate::loader::PluginCallError>),
    TimedOut,
    Died,
}

/// Runs one lifecycle call on a watched thread with a bounded wait.
///
/// A timed-out call is abandoned, not killed; the thread keeps its own
/// strong handles and finishes (or spins) on its own.
fn watched_call(
    instance: Arc<dyn PluginInstance>,
    stop_phase: bool,
    timeout: Duration,
    thread_name: String,
) -> WatchedOutcome {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new().name(thread_name).spawn(move || {
        let result = if stop_phase {
            instance.stop()
        } else {
            instance.start()
        };
        let _ = tx.send(result);
    });
    if spawned.is_err() {
        return WatchedOutcome::Died;
    }
    match rx.recv_timeout(timeout) {
        Ok(result) => WatchedOutcome::Completed(result),
        Err(RecvTimeoutError::Timeout) => WatchedOutcome::TimedOut,
        Err(RecvTimeoutError::Disconnected) => WatchedOutcome::Died,
    }
}

/// The micro-kernel.
pub struct Kernel {
    shared: Arc<KernelShared>,
    loader: Box<dyn BundleLoader>,
    audit: Option<Box<dyn AuditHook>>,
    plugins: Mutex<PluginTable>,
    modules: Mutex<ModuleRegistry>,
    generation: AtomicU64,
}

impl Kernel {
    /// Creates a kernel over the given loader. No scanning happens yet;
    /// call [`init`](Self::init) (or [`scan`](Self::scan) + loads) next.
    #[must_use]
    pub fn new(config: KernelConfig, loader: Box<dyn BundleLoader>) -> Self {
        Self {
            shared: KernelShared::new(config),
            loader,
            audit: None,
            plugins: Mutex::new(PluginTable::default()),
            modules: Mutex::new(ModuleRegistry::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Installs the pre-load audit hook.
    #[must_use]
    pub fn with_audit(mut self, hook: Box<dyn AuditHook>) -> Self {
        self.audit = Some(hook);
        self
    }

    /// The kernel configuration.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        self.shared.config()
    }

    // ── Discovery ────────────────────────────────────────────

    /// Scans the plugin root and merges the result into the registry.
    ///
    /// Non-destructive for running plugins: their `instance`, facade, and
    /// module handle are never touched, and a changed dependency list is
    /// parked until the next load. Inactive records whose bundle vanished
    /// are dropped. Returns the number of bundles discovered.
    pub fn scan(&self) -> usize {
        let bundles = manifest::scan(&self.shared.config().plugin_root);
        let count = bundles.len();

        let mut table = self.plugins.lock();
        let mut seen: HashSet<String> = HashSet::new();
        for bundle in bundles {
            seen.insert(bundle.name.clone());
            match table.get_mut(&bundle.name) {
                Some(meta) => {
                    meta.path = bundle.path;
                    meta.version = bundle.version;
                    meta.entry = bundle.entry;
                    if meta.active {
                        if meta.dependencies != bundle.dependencies {
                            debug!(
                                plugin = %meta.name,
                                "dependency change parked until next load"
                            );
                            meta.pending_dependencies = Some(bundle.dependencies);
                        }
                    } else {
                        meta.dependencies = bundle.dependencies;
                        meta.pending_dependencies = None;
                    }
                }
                None => table.insert(PluginMeta::from_bundle(bundle)),
            }
        }
        table.retain(|meta| meta.active || seen.contains(&meta.name));
        debug!(count, "scan complete");
        count
    }

    fn nodes(&self) -> Vec<ResolveNode> {
        self.plugins
            .lock()
            .iter()
            .map(|meta| ResolveNode {
                name: meta.name.clone(),
                version: meta.version.clone(),
                dependencies: meta.dependencies.clone(),
            })
            .collect()
    }

    /// Resolves the current load order.
    #[must_use]
    pub fn resolution(&self) -> Resolution {
        resolver::resolve(&self.nodes())
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Loads one plugin. A load of an already-active plugin is a no-op
    /// success.
    ///
    /// Sequence: audit hook → execute the code unit under a fresh module
    /// key → inject the facade → `start()` on a watched thread with the
    /// configured bounded wait. Timeouts set the plugin's stop signal
    /// (severing further kernel calls from the runaway task) and roll the
    /// load back; the task itself is never killed.
    pub fn load(&self, name: &str) -> Result<(), KernelError> {
        let mut table = self.plugins.lock();
        let Some(meta) = table.get(name) else {
            return Err(KernelError::UnknownPlugin(name.to_string()));
        };
        if meta.active {
            debug!(plugin = name, "already active");
            return Ok(());
        }
        let bundle_dir = meta.path.clone();
        let entry = bundle_dir.join(&meta.entry);

        if let Some(audit) = &self.audit {
            match audit.audit(&entry) {
                Ok(findings) if !findings.is_empty() => {
                    warn!(plugin = name, count = findings.len(), "audit blocked load");
                    return Err(KernelError::AuditBlocked {
                        plugin: name.to_string(),
                        findings,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(KernelError::LoadFailed {
                        plugin: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let key = module_key(name, generation);
        let api = PluginApi::new(&self.shared, name, &bundle_dir);

        let loaded = self
            .loader
            .load(&entry, Arc::clone(&api))
            .map_err(|e| KernelError::LoadFailed {
                plugin: name.to_string(),
                reason: e.0,
            })?;

        let outcome = watched_call(
            Arc::clone(&loaded.instance),
            false,
            self.shared.config().start_timeout,
            format!("mikro-start-{name}"),
        );
        match outcome {
            WatchedOutcome::Completed(Ok(())) => {
                self.modules.lock().insert(key.clone(), loaded.module);
                let Some(meta) = table.get_mut(name) else {
                    return Err(KernelError::UnknownPlugin(name.to_string()));
                };
                meta.module_key = Some(key);
                meta.instance = Some(loaded.instance);
                meta.api = Some(api);
                meta.active = true;
                info!(plugin = name, "plugin ready");
                Ok(())
            }
            WatchedOutcome::Completed(Err(fault)) => {
                warn!(plugin = name, error = %fault, "start() failed, rolling back");
                if let WatchedOutcome::Completed(Err(e)) = watched_call(
                    Arc::clone(&loaded.instance),
                    true,
                    self.shared.config().stop_timeout,
                    format!("mikro-stop-{name}"),
                ) {
                    debug!(plugin = name, error = %e, "best-effort stop() also failed");
                }
                api.cleanup(self.shared.config().task_grace);
                self.release_partial_state(name);
                Err(KernelError::StartFailed {
                    plugin: name.to_string(),
                    reason: fault.0,
                })
            }
            WatchedOutcome::TimedOut => {
                let timeout = self.shared.config().start_timeout;
                warn!(
                    plugin = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "start() timed out, abandoning runaway task"
                );
                api.stop_signal().set();
                self.release_partial_state(name);
                Err(KernelError::StartTimeout {
                    plugin: name.to_string(),
                    timeout,
                })
            }
            WatchedOutcome::Died => {
                warn!(plugin = name, "start() panicked, rolling back");
                api.cleanup(self.shared.config().task_grace);
                self.release_partial_state(name);
                Err(KernelError::StartFailed {
                    plugin: name.to_string(),
                    reason: "start() panicked".to_string(),
                })
            }
        }
    }

    /// Drops whatever a plugin registered before its load fell over:
    /// subscriptions and local-scope data. The module was not cached yet.
    fn release_partial_state(&self, name: &str) {
        self.shared.registry().unregister_by_owner(name);
        self.shared.registry().drop_local(name);
    }

    /// Unloads one plugin. A no-op (returning `false`) when the plugin is
    /// unknown or not active.
    ///
    /// Every step is independently fault-tolerant: a `stop()` that
    /// raises, overruns, or panics is logged and the teardown continues.
    pub fn unload(&self, name: &str) -> bool {
        let mut table = self.plugins.lock();
        let Some(meta) = table.get_mut(name) else {
            warn!(plugin = name, "cannot unload unknown plugin");
            return false;
        };
        if !meta.active {
            debug!(plugin = name, "not active, nothing to unload");
            return false;
        }

        info!(plugin = name, "unloading");
        let instance = meta.instance.clone();
        let api = meta.api.clone();
        meta.clear_runtime();

        if let Some(instance) = instance {
            match watched_call(
                instance,
                true,
                self.shared.config().stop_timeout,
                format!("mikro-stop-{name}"),
            ) {
                WatchedOutcome::Completed(Ok(())) => {}
                WatchedOutcome::Completed(Err(e)) => {
                    warn!(plugin = name, error = %e, "stop() raised")
                }
                WatchedOutcome::TimedOut => {
                    warn!(plugin = name, "stop() exceeded its bounded wait")
                }
                WatchedOutcome::Died => warn!(plugin = name, "stop() panicked"),
            }
        }

        if let Some(api) = api {
            api.cleanup(self.shared.config().task_grace);
        }

        self.shared.registry().unregister_by_owner(name);
        self.shared.registry().drop_local(name);
        self.modules.lock().remove_tagged(name);
        info!(plugin = name, "plugin unloaded");
        true
    }

    /// Reloads one plugin and cascades over its reverse-dependency tree.
    ///
    /// Dependents are unloaded leaves-first, then the target; manifests
    /// are rescanned; the target is loaded again. If the target fails to
    /// come back, the dependents are left down — propagating a broken
    /// base is worse than a partial outage. Dependent load failures are
    /// logged and leave that plugin inactive without aborting the rest.
    pub fn reload(&self, name: &str) -> Result<(), KernelError> {
        if !self.plugins.lock().contains(name) {
            warn!(plugin = name, "cannot reload unknown plugin");
            return Err(KernelError::UnknownPlugin(name.to_string()));
        }

        let nodes = self.nodes();
        let resolution = resolver::resolve(&nodes);
        let dependents = resolver::reverse_deps(&nodes, name, &resolution.order);
        info!(
            plugin = name,
            dependents = dependents.len(),
            "reloading with cascade"
        );

        for dep in dependents.iter().rev() {
            self.unload(dep);
        }
        self.unload(name);
        self.scan();
        self.load(name)?;
        for dep in &dependents {
            if let Err(e) = self.load(dep) {
                warn!(plugin = %dep, error = %e, "dependent failed to come back");
            }
        }
        Ok(())
    }

    /// Initial bring-up: scan, resolve, load everything in order.
    pub fn init(&self) -> InitReport {
        self.scan();
        let resolution = self.resolution();
        for err in &resolution.errors {
            warn!(error = %err, "plugin excluded from bring-up");
        }

        let mut report = InitReport {
            excluded: resolution.errors,
            ..InitReport::default()
        };
        for name in &resolution.order {
            match self.load(name) {
                Ok(()) => report.loaded.push(name.clone()),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "load failed during bring-up");
                    report.failed.push((name.clone(), e));
                }
            }
        }
        report
    }

    /// Unloads every active plugin in reverse topological order and shuts
    /// the worker pool down without waiting for outstanding async events.
    /// Facade calls made afterwards fail with a kernel-gone error.
    pub fn shutdown(&self) {
        info!("kernel shutting down");
        let order = self.resolution().order;
        for name in order.iter().rev() {
            self.unload(name);
        }
        // Anything still active was loaded outside the resolvable order.
        let stragglers: Vec<String> = {
            let table = self.plugins.lock();
            table
                .iter()
                .filter(|m| m.active)
                .map(|m| m.name.clone())
                .collect()
        };
        for name in stragglers.iter().rev() {
            self.unload(name);
        }
        self.shared.shutdown();
    }

    // ── Inspection & dispatch for frontends ──────────────────

    /// Lists every registered plugin in insertion order.
    #[must_use]
    pub fn plugins(&self) -> Vec<PluginStatus> {
        self.plugins
            .lock()
            .iter()
            .map(|meta| PluginStatus {
                name: meta.name.clone(),
                version: meta.version.clone(),
                active: meta.active,
            })
            .collect()
    }

    /// Whether the named plugin is currently active.
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.plugins.lock().get(name).is_some_and(|m| m.active)
    }

    /// Kernel-side asynchronous fan-out (see [`KernelShared::emit`]).
    #[must_use]
    pub fn emit(&self, event: &str, args: EventArgs) -> Vec<EventFuture> {
        self.shared.emit(event, args)
    }

    /// Kernel-side synchronous fan-out (see [`KernelShared::call`]).
    #[must_use]
    pub fn call(
        &self,
        event: &str,
        args: EventArgs,
        timeout: Option<Duration>,
    ) -> Vec<Result<Value, CallbackError>> {
        self.shared.call(event, args, timeout)
    }

    /// Snapshot of the global store.
    #[must_use]
    pub fn global_data(&self) -> Map<String, Value> {
        self.shared.registry().globals_snapshot()
    }

    /// Number of cached module handles (all plugins, all generations).
    #[must_use]
    pub fn cached_modules(&self) -> usize {
        self.modules.lock().len()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
