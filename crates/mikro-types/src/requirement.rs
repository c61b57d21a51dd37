//! Dependency requirement grammar.
//!
//! A requirement is `name` or `name OP version`, e.g. `core`,
//! `core>=2.0.0`, `store == 1.2`. Names are `[A-Za-z0-9_-]+`; versions
//! are dotted integers compared with zero padding.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator in a requirement.
///
/// `=` and `==` both parse to [`ConstraintOp::Eq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// Exact match (after padding).
    Eq,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Ge,
    /// Strictly less.
    Lt,
    /// Less or equal.
    Le,
}

impl ConstraintOp {
    /// Evaluates `candidate OP bound`.
    #[must_use]
    pub fn eval(self, candidate: &Version, bound: &Version) -> bool {
        match self {
            Self::Eq => candidate == bound,
            Self::Gt => candidate > bound,
            Self::Ge => candidate >= bound,
            Self::Lt => candidate < bound,
            Self::Le => candidate <= bound,
        }
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        write!(f, "{s}")
    }
}

/// A parsed dependency requirement.
///
/// # Example
///
/// ```
/// use mikro_types::Requirement;
///
/// let bare: Requirement = "core".parse().unwrap();
/// assert!(bare.constraint.is_none());
/// assert!(bare.satisfied_by(&"0.1".parse().unwrap()));
///
/// let pinned: Requirement = "core>=2.0.0".parse().unwrap();
/// assert!(!pinned.satisfied_by(&"1.0.0".parse().unwrap()));
/// assert!(pinned.satisfied_by(&"2.0".parse().unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Name of the required plugin.
    pub name: String,
    /// Optional version constraint.
    pub constraint: Option<(ConstraintOp, Version)>,
}

impl Requirement {
    /// Returns `true` when `version` satisfies this requirement.
    ///
    /// A bare requirement (no constraint) is satisfied by any version.
    #[must_use]
    pub fn satisfied_by(&self, version: &Version) -> bool {
        match &self.constraint {
            None => true,
            Some((op, bound)) => op.eval(version, bound),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            None => write!(f, "{}", self.name),
            Some((op, bound)) => write!(f, "{}{}{}", self.name, op, bound),
        }
    }
}

/// Error parsing a requirement string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid requirement {input:?}: {reason}")]
pub struct RequirementParseError {
    /// The offending input.
    pub input: String,
    /// What went wrong.
    pub reason: String,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl FromStr for Requirement {
    type Err = RequirementParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| RequirementParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err("empty string"));
        }

        let name_end = trimmed
            .char_indices()
            .find(|(_, c)| !is_name_char(*c))
            .map_or(trimmed.len(), |(i, _)| i);
        let name = &trimmed[..name_end];
        if name.is_empty() {
            return Err(err("missing name"));
        }

        let rest = trimmed[name_end..].trim_start();
        if rest.is_empty() {
            return Ok(Self {
                name: name.to_string(),
                constraint: None,
            });
        }

        // Longest operator first so ">=" is not read as ">" "=".
        let (op, ver_str) = if let Some(v) = rest.strip_prefix(">=") {
            (ConstraintOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (ConstraintOp::Le, v)
        } else if let Some(v) = rest.strip_prefix("==") {
            (ConstraintOp::Eq, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (ConstraintOp::Eq, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (ConstraintOp::Gt, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (ConstraintOp::Lt, v)
        } else {
            return Err(err("expected one of ==, =, >=, >, <=, < after name"));
        };

        let ver_str = ver_str.trim();
        if ver_str.is_empty() {
            return Err(err("missing version after operator"));
        }
        let bound: Version = ver_str
            .parse()
            .map_err(|e: crate::VersionParseError| err(&e.reason))?;

        Ok(Self {
            name: name.to_string(),
            constraint: Some((op, bound)),
        })
    }
}
