//! Unified error code interface.
//!
//! Every public MIKRO error type implements [`ErrorCode`] so frontends and
//! tests can match on stable machine-readable codes instead of display
//! strings.
//!
//! # Conventions
//!
//! - Codes are `UPPER_SNAKE_CASE`, prefixed with the owning layer
//!   (`KERNEL_`, `LUA_`, ...), and stable once published.
//! - An error is *recoverable* when retrying or operator action can
//!   succeed (timeouts, transient plugin faults); it is not when retry
//!   cannot help (contract violations, unknown names).
//!
//! # Example
//!
//! ```
//! use mikro_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum StoreError {
//!     Protected(String),
//!     Busy,
//! }
//!
//! impl ErrorCode for StoreError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Protected(_) => "STORE_PROTECTED_KEY",
//!             Self::Busy => "STORE_BUSY",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//! }
//!
//! assert_eq!(StoreError::Busy.code(), "STORE_BUSY");
//! ```

/// Machine-readable error code contract.
pub trait ErrorCode {
    /// Returns the stable `UPPER_SNAKE_CASE` code for this error.
    fn code(&self) -> &'static str;

    /// Returns whether a retry or operator action can succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error's code follows MIKRO conventions.
///
/// # Panics
///
/// Panics when the code is empty, misses the expected prefix, or is not
/// `UPPER_SNAKE_CASE`. Intended for use in tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();
    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code {code:?} must start with prefix {expected_prefix:?}"
    );
    assert!(
        is_upper_snake_case(code),
        "error code {code:?} must be UPPER_SNAKE_CASE"
    );
}

/// Asserts conventions for every variant of an error enum.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && !s.contains("__")
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
