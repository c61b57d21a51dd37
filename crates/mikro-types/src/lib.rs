//! Core types for the MIKRO plugin runtime.
//!
//! This crate is the bottom of the MIKRO stack: it defines the vocabulary
//! shared by the kernel, the plugin hosts, and the frontends, and has no
//! knowledge of any of them.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SDK Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  mikro-types   : Version, Requirement, Scope, ErrorCode ◄── │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Core Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  mikro-kernel  : scanner, resolver, registry, supervisor    │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Host Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  mikro-lua     : Lua bundle loader and plugin API bindings  │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Frontend Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  mikro-cli     : interactive kernel shell                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Contents
//!
//! - [`Version`] — dotted-integer plugin version with padded comparison
//! - [`Requirement`] / [`ConstraintOp`] — dependency requirement grammar
//! - [`Scope`] — tagged data scope (`Global` / `Local`)
//! - [`ErrorCode`] — unified machine-readable error code trait

mod error;
mod requirement;
mod scope;
mod version;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use requirement::{ConstraintOp, Requirement, RequirementParseError};
pub use scope::{Scope, ScopeParseError};
pub use version::{Version, VersionParseError};
