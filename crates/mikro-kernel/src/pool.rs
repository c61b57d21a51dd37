//! Bounded worker pool for asynchronous event fan-out.
//!
//! A fixed set of worker threads drains a shared job queue. Jobs run under
//! `catch_unwind`, so one panicking callback never takes a worker down.
//! [`EventFuture`] is the caller-side handle to one dispatched callback.

use mikro_types::ErrorCode;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failure modes of one dispatched callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The callback returned an error.
    #[error("callback failed: {0}")]
    Failed(String),

    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// The job was discarded by worker-pool shutdown.
    #[error("dispatch canceled by worker pool shutdown")]
    Canceled,

    /// The advisory deadline of a synchronous fan-out passed before this
    /// subscriber was invoked.
    #[error("synchronous dispatch deadline passed")]
    Timeout,
}

impl ErrorCode for CallbackError {
    fn code(&self) -> &'static str {
        match self {
            Self::Failed(_) => "EVENT_CALLBACK_FAILED",
            Self::Panicked(_) => "EVENT_CALLBACK_PANICKED",
            Self::Canceled => "EVENT_CANCELED",
            Self::Timeout => "EVENT_TIMEOUT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Canceled | Self::Timeout)
    }
}

/// Turns a panic payload into something printable.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result handle for one asynchronously dispatched callback.
///
/// Handles are returned in subscription order; completion order is
/// unspecified.
pub struct EventFuture {
    event: String,
    owner: String,
    rx: Receiver<Result<Value, CallbackError>>,
}

impl EventFuture {
    pub(crate) fn new(
        event: String,
        owner: String,
        rx: Receiver<Result<Value, CallbackError>>,
    ) -> Self {
        Self { event, owner, rx }
    }

    /// Event this future belongs to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Owner of the subscription that produced this future.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Blocks until the callback finishes.
    ///
    /// Resolves to [`CallbackError::Canceled`] when the pool discarded the
    /// job before running it.
    #[must_use]
    pub fn wait(self) -> Result<Value, CallbackError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(CallbackError::Canceled),
        }
    }

    /// Waits up to `timeout`; gives the future back on `Err` so the caller
    /// can retry.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<Value, CallbackError>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(CallbackError::Canceled)),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

impl std::fmt::Debug for EventFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFuture")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Fixed-size worker pool over a shared job queue.
pub struct WorkerPool {
    sender: parking_lot::Mutex<Option<Sender<Job>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(parking_lot::Mutex::new(rx));

        for i in 0..size {
            let rx = Arc::clone(&rx);
            let builder = thread::Builder::new().name(format!("mikro-worker-{i}"));
            let spawned = builder.spawn(move || loop {
                let job = {
                    let guard = rx.lock();
                    guard.recv()
                };
                match job {
                    Ok(job) => {
                        let _ = catch_unwind(AssertUnwindSafe(job));
                    }
                    Err(_) => break,
                }
            });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "failed to spawn pool worker");
            }
        }

        Self {
            sender: parking_lot::Mutex::new(Some(tx)),
            size,
        }
    }

    /// Number of workers this pool was built with.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Submits a job. Returns `false` (job dropped) after shutdown.
    pub(crate) fn submit(&self, job: Job) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Closes the queue. Outstanding jobs are not awaited; workers exit
    /// once the queue drains.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            debug!("worker pool shut down");
        }
    }
}
