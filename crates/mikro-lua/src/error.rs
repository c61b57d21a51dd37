//! Lua host errors.

use mikro_types::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Error loading or running a Lua bundle.
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `EntryMissing` | `LUA_ENTRY_MISSING` | No |
/// | `Unreadable` | `LUA_ENTRY_UNREADABLE` | Yes |
/// | `Runtime` | `LUA_RUNTIME` | Yes |
/// | `Contract` | `LUA_CONTRACT` | No |
#[derive(Debug, Error)]
pub enum HostError {
    /// The bundle's entry file does not exist.
    #[error("entry file not found: {0}")]
    EntryMissing(PathBuf),

    /// The entry file exists but could not be read.
    #[error("cannot read entry file: {0}")]
    Unreadable(#[from] std::io::Error),

    /// The Lua runtime reported an error.
    #[error("lua error: {0}")]
    Runtime(#[from] mlua::Error),

    /// The entry file does not satisfy the plugin contract: a global
    /// `Plugin(api)` factory yielding a table with `start` and `stop`
    /// functions.
    #[error("plugin contract violated: {0}")]
    Contract(String),
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::EntryMissing(_) => "LUA_ENTRY_MISSING",
            Self::Unreadable(_) => "LUA_ENTRY_UNREADABLE",
            Self::Runtime(_) => "LUA_RUNTIME",
            Self::Contract(_) => "LUA_CONTRACT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unreadable(_) | Self::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mikro_types::assert_error_codes;

    #[test]
    fn codes_follow_conventions() {
        assert_error_codes(
            &[
                HostError::EntryMissing(PathBuf::from("x")),
                HostError::Contract("no start".into()),
            ],
            "LUA_",
        );
    }
}
