//! Per-plugin capability facade.
//!
//! Every plugin talks to the kernel exclusively through its [`PluginApi`]:
//! logging, config reads, scoped data, events, and managed tasks. The
//! facade holds a **non-owning** back-reference to the kernel; after
//! kernel shutdown every kernel-touching operation fails with
//! [`KernelError::KernelGone`] while facade-local operations (`is_active`,
//! `log`, task bookkeeping) keep working.
//!
//! # Lock order
//!
//! The facade-local lock is always taken and released *before* calling
//! into the kernel; no code path holds both at once.

use crate::error::KernelError;
use crate::kernel::KernelShared;
use crate::manifest::MANIFEST_FILE;
use crate::pool::{CallbackError, EventFuture};
use crate::registry::{Callback, EventArgs, Subscription};
use mikro_types::Scope;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One-shot stop latch.
///
/// Set exactly once, never cleared. Managed tasks poll
/// [`is_set`](Self::is_set) (through `PluginApi::is_active`) between
/// iterations of any long-running loop.
#[derive(Debug, Default)]
pub struct StopSignal(std::sync::atomic::AtomicBool);

impl StopSignal {
    /// Sets the latch.
    pub fn set(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Returns whether the latch has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Handle to one managed task.
///
/// The task thread owns the paired sender; when the thread finishes (or
/// panics) the receiver disconnects, which is what makes a bounded join
/// possible.
pub(crate) struct TaskHandle {
    name: String,
    done: mpsc::Receiver<()>,
    join: thread::JoinHandle<()>,
}

impl TaskHandle {
    /// Waits up to `grace` for the task to finish. Returns `false` when
    /// the task is still running (a zombie).
    fn join_within(self, grace: Duration) -> bool {
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.join.join().is_err() {
                    warn!(task = %self.name, "managed task panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

#[derive(Default)]
struct ApiState {
    tasks: Vec<TaskHandle>,
    subscribed: Vec<String>,
}

/// The capability facade handed to plugin code.
pub struct PluginApi {
    kernel: Weak<KernelShared>,
    plugin_name: String,
    plugin_dir: PathBuf,
    stop: Arc<StopSignal>,
    state: Mutex<ApiState>,
}

impl PluginApi {
    pub(crate) fn new(kernel: &Arc<KernelShared>, name: &str, dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            kernel: Arc::downgrade(kernel),
            plugin_name: name.to_string(),
            plugin_dir: dir.to_path_buf(),
            stop: Arc::new(StopSignal::default()),
            state: Mutex::new(ApiState::default()),
        })
    }

    fn kernel(&self) -> Result<Arc<KernelShared>, KernelError> {
        match self.kernel.upgrade() {
            Some(shared) if shared.is_alive() => Ok(shared),
            _ => Err(KernelError::KernelGone),
        }
    }

    /// Name of the plugin this facade belongs to.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The plugin's bundle directory.
    #[must_use]
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Shared handle to this plugin's stop latch.
    #[must_use]
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    /// `true` until the stop latch is set.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.stop.is_set()
    }

    /// Emits one log line tagged with the plugin name and the current
    /// executor. Works even after kernel shutdown.
    pub fn log(&self, message: &str) {
        let current = thread::current();
        info!(
            target: "mikro::plugin",
            plugin = %self.plugin_name,
            executor = current.name().unwrap_or("<unnamed>"),
            "{message}"
        );
    }

    /// Reads and parses this bundle's `config.json`.
    ///
    /// Returns an empty map when the file is absent or malformed.
    #[must_use]
    pub fn plugin_config(&self) -> Map<String, Value> {
        let path = self.plugin_dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    debug!(plugin = %self.plugin_name, "manifest is not a JSON object");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        }
    }

    // ── Scoped data ──────────────────────────────────────────

    /// Reads a key from the shared store.
    pub fn get_data(&self, key: &str, scope: Scope) -> Result<Option<Value>, KernelError> {
        let kernel = self.kernel()?;
        Ok(kernel.registry().get(&self.plugin_name, key, scope))
    }

    /// Writes a key. Returns `Ok(false)` when the protected-key policy
    /// rejected a global write.
    pub fn set_data(&self, key: &str, value: Value, scope: Scope) -> Result<bool, KernelError> {
        let kernel = self.kernel()?;
        Ok(kernel.registry().set(&self.plugin_name, key, value, scope))
    }

    /// Appends to a list-valued global key.
    pub fn append_data(&self, key: &str, value: Value) -> Result<bool, KernelError> {
        let kernel = self.kernel()?;
        Ok(kernel.registry().append_global(&self.plugin_name, key, value))
    }

    // ── Events ───────────────────────────────────────────────

    /// Subscribes a callback under this plugin's owner tag.
    pub fn on(&self, event: &str, callback: Callback) -> Result<(), KernelError> {
        {
            let mut state = self.state.lock();
            state.subscribed.push(event.to_string());
        }
        let kernel = self.kernel()?;
        kernel.registry().register(Subscription {
            event: event.to_string(),
            owner: self.plugin_name.clone(),
            callback,
        });
        Ok(())
    }

    /// Asynchronous fan-out; returns one future per subscriber in
    /// subscription order. Does not block.
    pub fn emit(&self, event: &str, args: EventArgs) -> Result<Vec<EventFuture>, KernelError> {
        let kernel = self.kernel()?;
        Ok(kernel.emit(event, args))
    }

    /// Synchronous fan-out, inline on the calling thread; returns results
    /// positionally matching the subscriber snapshot.
    pub fn call(
        &self,
        event: &str,
        args: EventArgs,
        timeout: Option<Duration>,
    ) -> Result<Vec<Result<Value, CallbackError>>, KernelError> {
        let kernel = self.kernel()?;
        Ok(kernel.call(event, args, timeout))
    }

    /// Event names this plugin subscribed through this facade.
    #[must_use]
    pub fn subscribed_events(&self) -> Vec<String> {
        self.state.lock().subscribed.clone()
    }

    // ── Managed tasks ────────────────────────────────────────

    /// Starts a managed task.
    ///
    /// Fails fast with [`KernelError::NotActive`] once the stop latch is
    /// set. The target is not wrapped or supervised beyond completion
    /// tracking: cooperative exit (polling `is_active`) is the plugin's
    /// responsibility. Detached tasks are not tracked for join.
    pub fn spawn_task<F>(&self, name: &str, detached: bool, target: F) -> Result<(), KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stop.is_set() {
            warn!(plugin = %self.plugin_name, task = name, "spawn_task after stop signal");
            return Err(KernelError::NotActive(self.plugin_name.clone()));
        }

        let (tx, rx) = mpsc::channel();
        let thread_name = format!("mikro-task-{}-{}", self.plugin_name, name);
        let handle = match thread::Builder::new().name(thread_name).spawn(move || {
            let _done = tx;
            target();
        }) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(plugin = %self.plugin_name, task = name, error = %e, "task thread spawn failed");
                return Err(KernelError::NotActive(self.plugin_name.clone()));
            }
        };

        if detached {
            debug!(plugin = %self.plugin_name, task = name, "detached task started");
            return Ok(());
        }

        self.state.lock().tasks.push(TaskHandle {
            name: name.to_string(),
            done: rx,
            join: handle,
        });
        Ok(())
    }

    /// Number of tracked managed tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Sets the stop latch and joins every tracked task within the
    /// per-task grace. Tasks that ignore the latch are logged as zombies
    /// and abandoned, never killed.
    pub(crate) fn cleanup(&self, grace: Duration) {
        self.stop.set();
        let tasks = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            let name = task.name.clone();
            if task.join_within(grace) {
                debug!(plugin = %self.plugin_name, task = %name, "managed task joined");
            } else {
                warn!(
                    plugin = %self.plugin_name,
                    task = %name,
                    grace_ms = grace.as_millis() as u64,
                    "managed task ignored stop signal, leaving zombie"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn shared() -> Arc<KernelShared> {
        KernelShared::new(KernelConfig::default())
    }

    fn api(shared: &Arc<KernelShared>) -> Arc<PluginApi> {
        PluginApi::new(shared, "probe", Path::new("/nonexistent/probe"))
    }

    #[test]
    fn stop_signal_is_one_shot() {
        let signal = StopSignal::default();
        assert!(!signal.is_set());
        signal.set();
        signal.set();
        assert!(signal.is_set());
    }

    #[test]
    fn data_round_trip_through_facade() {
        let shared = shared();
        let api = api(&shared);

        assert!(api.set_data("k", json!(1), Scope::Local).expect("set"));
        assert_eq!(
            api.get_data("k", Scope::Local).expect("get"),
            Some(json!(1))
        );
        assert_eq!(api.get_data("k", Scope::Global).expect("get"), None);
    }

    #[test]
    fn kernel_gone_after_shared_dropped() {
        let shared = shared();
        let api = api(&shared);
        drop(shared);

        let err = api.get_data("k", Scope::Global).unwrap_err();
        assert!(matches!(err, KernelError::KernelGone));
        // Facade-local surface keeps working.
        assert!(api.is_active());
        api.log("still here");
    }

    #[test]
    fn kernel_gone_after_alive_cleared() {
        let shared = shared();
        let api = api(&shared);
        shared.mark_shutdown();

        assert!(matches!(
            api.set_data("k", json!(1), Scope::Local),
            Err(KernelError::KernelGone)
        ));
    }

    #[test]
    fn spawn_task_joins_on_cleanup() {
        let shared = shared();
        let api = api(&shared);
        let finished = Arc::new(AtomicBool::new(false));

        let stop = api.stop_signal();
        let flag = Arc::clone(&finished);
        api.spawn_task("poller", false, move || {
            while !stop.is_set() {
                thread::sleep(Duration::from_millis(2));
            }
            flag.store(true, Ordering::SeqCst);
        })
        .expect("spawn");
        assert_eq!(api.task_count(), 1);

        api.cleanup(Duration::from_millis(500));
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(api.task_count(), 0);
    }

    #[test]
    fn stubborn_task_becomes_zombie_but_cleanup_returns() {
        let shared = shared();
        let api = api(&shared);
        let release = Arc::new(AtomicBool::new(false));

        let gate = Arc::clone(&release);
        api.spawn_task("stubborn", false, move || {
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
        })
        .expect("spawn");

        let before = std::time::Instant::now();
        api.cleanup(Duration::from_millis(30));
        assert!(before.elapsed() < Duration::from_secs(1));

        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn spawn_task_fails_after_stop() {
        let shared = shared();
        let api = api(&shared);
        api.cleanup(Duration::from_millis(10));

        let err = api.spawn_task("late", false, || {}).unwrap_err();
        assert!(matches!(err, KernelError::NotActive(_)));
    }

    #[test]
    fn subscriptions_tracked_locally() {
        let shared = shared();
        let api = api(&shared);
        api.on("tick", Arc::new(|_| Ok(Value::Null))).expect("on");
        api.on("tock", Arc::new(|_| Ok(Value::Null))).expect("on");

        assert_eq!(api.subscribed_events(), vec!["tick", "tock"]);
        assert_eq!(shared.registry().subscriber_count("tick"), 1);
    }

    #[test]
    fn plugin_config_missing_file_is_empty() {
        let shared = shared();
        let api = api(&shared);
        assert!(api.plugin_config().is_empty());
    }
}
