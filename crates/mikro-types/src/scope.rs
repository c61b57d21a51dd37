//! Data scope tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scope of a key in the shared store.
///
/// The core always works with the tagged form; the string forms
/// (`"global"` / `"local"`) exist only at the plugin-facing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Shared across every plugin.
    Global,
    /// Private to the calling plugin; dropped on unload.
    Local,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Error parsing a scope string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope {0:?} (expected \"global\" or \"local\")")]
pub struct ScopeParseError(pub String);

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "local" => Ok(Self::Local),
            _ => Err(ScopeParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_scopes() {
        assert_eq!("global".parse::<Scope>().unwrap(), Scope::Global);
        assert_eq!("Local".parse::<Scope>().unwrap(), Scope::Local);
        assert!("world".parse::<Scope>().is_err());
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(Scope::Global.to_string(), "global");
        assert_eq!(Scope::Local.to_string(), "local");
    }
}
