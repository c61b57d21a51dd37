//! Dotted-integer plugin versions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A plugin version: one or more dot-separated non-negative integers.
///
/// Comparison right-pads the shorter side with zeros, so `"1"`, `"1.0"`
/// and `"1.0.0"` compare equal. The original component count is kept for
/// display: a manifest that declares `"1.0"` lists as `1.0`.
///
/// # Example
///
/// ```
/// use mikro_types::Version;
///
/// let a: Version = "1".parse().unwrap();
/// let b: Version = "1.0.0".parse().unwrap();
/// let c: Version = "1.2".parse().unwrap();
///
/// assert_eq!(a, b);
/// assert!(c > b);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(Vec<u32>);

impl Version {
    /// Creates a version from raw components.
    ///
    /// Empty input yields the zero version.
    #[must_use]
    pub fn new(components: Vec<u32>) -> Self {
        if components.is_empty() {
            Self(vec![0])
        } else {
            Self(components)
        }
    }

    /// Returns the raw components as declared.
    #[must_use]
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Components with trailing zeros stripped (at least one kept).
    ///
    /// This is the canonical form used for equality and hashing.
    fn normalized(&self) -> &[u32] {
        let mut end = self.0.len();
        while end > 1 && self.0[end - 1] == 0 {
            end -= 1;
        }
        &self.0[..end]
    }
}

impl Default for Version {
    /// The zero version, `0.0.0`.
    fn default() -> Self {
        Self(vec![0, 0, 0])
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Error parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version {input:?}: {reason}")]
pub struct VersionParseError {
    /// The offending input.
    pub input: String,
    /// What went wrong.
    pub reason: String,
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionParseError {
                input: s.to_string(),
                reason: "empty string".to_string(),
            });
        }
        let mut components = Vec::new();
        for part in s.split('.') {
            let n: u32 = part.parse().map_err(|_| VersionParseError {
                input: s.to_string(),
                reason: format!("component {part:?} is not a non-negative integer"),
            })?;
            components.push(n);
        }
        Ok(Self(components))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}
