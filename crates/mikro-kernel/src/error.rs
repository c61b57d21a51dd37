//! Kernel errors.
//!
//! All errors implement [`ErrorCode`] with the `KERNEL_` prefix.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`UnknownPlugin`](KernelError::UnknownPlugin) | `KERNEL_UNKNOWN_PLUGIN` | No |
//! | [`Resolve`](KernelError::Resolve) | `KERNEL_DEP_CYCLE` / `KERNEL_DEP_MISSING` | No |
//! | [`AuditBlocked`](KernelError::AuditBlocked) | `KERNEL_AUDIT_BLOCKED` | No |
//! | [`LoadFailed`](KernelError::LoadFailed) | `KERNEL_LOAD_FAILED` | Yes |
//! | [`StartFailed`](KernelError::StartFailed) | `KERNEL_START_FAILED` | Yes |
//! | [`StartTimeout`](KernelError::StartTimeout) | `KERNEL_START_TIMEOUT` | Yes |
//! | [`KernelGone`](KernelError::KernelGone) | `KERNEL_GONE` | No |
//! | [`NotActive`](KernelError::NotActive) | `KERNEL_NOT_ACTIVE` | No |
//!
//! Stop-side faults (a `stop()` that raises or overruns its bounded wait)
//! are deliberately *not* error variants: unload is fault-tolerant and only
//! logs them, so they never surface to a caller.

use crate::audit::Finding;
use crate::resolver::ResolveError;
use mikro_types::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Error raised by public lifecycle operations and facade calls.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The named plugin is not in the registry.
    #[error("plugin {0:?} is not registered")]
    UnknownPlugin(String),

    /// Dependency resolution excluded the plugin.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The pre-load audit reported findings; the load was refused.
    #[error("audit blocked load of {plugin:?} ({} finding(s))", .findings.len())]
    AuditBlocked {
        /// Plugin whose load was refused.
        plugin: String,
        /// What the auditor found.
        findings: Vec<Finding>,
    },

    /// Loading or instantiating the plugin code failed.
    #[error("failed to load plugin {plugin:?}: {reason}")]
    LoadFailed {
        /// Plugin that failed to load.
        plugin: String,
        /// Loader-reported cause.
        reason: String,
    },

    /// `start()` raised or panicked; the load was rolled back.
    #[error("plugin {plugin:?} start() failed: {reason}")]
    StartFailed {
        /// Plugin whose start failed.
        plugin: String,
        /// Cause.
        reason: String,
    },

    /// `start()` did not return within the bounded wait.
    ///
    /// The runaway task is not killed; the plugin's stop signal is set so
    /// further kernel calls from it fail, and the load is rolled back.
    #[error("plugin {plugin:?} start() did not finish within {timeout:?}")]
    StartTimeout {
        /// Plugin whose start overran.
        plugin: String,
        /// The bounded wait that elapsed.
        timeout: Duration,
    },

    /// A facade call was made after kernel shutdown.
    #[error("kernel has shut down")]
    KernelGone,

    /// `spawn_task` was called after the plugin's stop signal was set.
    #[error("plugin {0:?} is stopping; no new tasks accepted")]
    NotActive(String),
}

impl ErrorCode for KernelError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownPlugin(_) => "KERNEL_UNKNOWN_PLUGIN",
            Self::Resolve(ResolveError::Cycle { .. }) => "KERNEL_DEP_CYCLE",
            Self::Resolve(ResolveError::Missing { .. }) => "KERNEL_DEP_MISSING",
            Self::AuditBlocked { .. } => "KERNEL_AUDIT_BLOCKED",
            Self::LoadFailed { .. } => "KERNEL_LOAD_FAILED",
            Self::StartFailed { .. } => "KERNEL_START_FAILED",
            Self::StartTimeout { .. } => "KERNEL_START_TIMEOUT",
            Self::KernelGone => "KERNEL_GONE",
            Self::NotActive(_) => "KERNEL_NOT_ACTIVE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. } | Self::StartFailed { .. } | Self::StartTimeout { .. }
        )
    }
}
