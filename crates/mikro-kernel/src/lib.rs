//! MIKRO kernel - the plugin runtime core.
//!
//! A process-embedded micro-kernel that discovers self-describing plugin
//! bundles on disk, computes a dependency-respecting load order, runs
//! plugins behind a capability facade, routes events between them, and
//! supports hot unload/reload with cascading reconciliation.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SDK Layer                             │
//! │  mikro-types   : Version, Requirement, Scope, ErrorCode     │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Core Layer (THIS CRATE)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  manifest  : bundle discovery (config.json)                 │
//! │  resolver  : topological order, reverse-dependency closure  │
//! │  registry  : scoped data + owner-tagged subscriptions       │
//! │  pool      : bounded fan-out workers, result futures        │
//! │  api       : per-plugin capability facade                   │
//! │  loader    : code-loading seam + versioned module cache     │
//! │  audit     : pre-load source validation hook                │
//! │  kernel    : lifecycle supervisor                           │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Host Layer                             │
//! │  mikro-lua     : Lua bundles behind the loader seam         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency Model
//!
//! Thread-based and cooperative. One bounded worker pool (default 5)
//! serves asynchronous event fan-out; synchronous fan-out always runs
//! inline on the caller's thread so a pool worker issuing a nested call
//! can never deadlock the pool. Plugin `start`/`stop` run on watched
//! threads with bounded waits; managed tasks are plain threads expected
//! to poll their facade's `is_active` between iterations. Nothing is ever
//! forcibly terminated — tasks that ignore the stop signal are logged as
//! zombies.
//!
//! # Example
//!
//! ```no_run
//! use mikro_kernel::{Kernel, KernelConfig};
//! use mikro_kernel::testing::ScriptedLoader;
//!
//! let kernel = Kernel::new(
//!     KernelConfig::default().with_plugin_root("plugins"),
//!     Box::new(ScriptedLoader::new()),
//! );
//! let report = kernel.init();
//! println!("{} plugin(s) up", report.loaded.len());
//! kernel.shutdown();
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod kernel;
pub mod loader;
pub mod manifest;
pub mod meta;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod testing;

pub use api::{PluginApi, StopSignal};
pub use audit::{AuditHook, Finding, PatternAuditor};
pub use config::{KernelConfig, ProtectedKeys};
pub use error::KernelError;
pub use kernel::{InitReport, Kernel, KernelShared};
pub use loader::{BundleLoader, LoadError, LoadedBundle, PluginCallError, PluginInstance};
pub use manifest::{BundleInfo, Manifest, DEFAULT_ENTRY, MANIFEST_FILE};
pub use meta::{PluginMeta, PluginStatus};
pub use pool::{CallbackError, EventFuture, WorkerPool};
pub use registry::{Callback, EventArgs, Registry, Subscription};
pub use resolver::{resolve, reverse_deps, Resolution, ResolveError, ResolveNode};
