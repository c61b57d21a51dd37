//! Pre-load code audit.
//!
//! The supervisor runs an optional [`AuditHook`] over a plugin's entry
//! file before loading it; any finding refuses the load. The audit is
//! advisory defense-in-depth, not a sandbox: a hostile plugin is out of
//! scope.

use std::path::Path;
use thiserror::Error;

/// One audit finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// The pattern (or rule) that matched.
    pub pattern: String,
    /// 1-based line number.
    pub line: usize,
    /// The offending line, trimmed.
    pub excerpt: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.excerpt, self.pattern)
    }
}

/// Error running the audit itself (not a finding).
#[derive(Debug, Error)]
pub enum AuditError {
    /// The entry file could not be read.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Validation hook run against a plugin entry file before load.
pub trait AuditHook: Send + Sync {
    /// Returns the findings for `entry`; an empty list passes the audit.
    fn audit(&self, entry: &Path) -> Result<Vec<Finding>, AuditError>;
}

/// Case-insensitive substring auditor.
///
/// Scans the entry source line by line and reports every line containing
/// a banned pattern. Good enough to catch the obvious escape hatches;
/// `lua_defaults` carries the stock pattern set for Lua bundles.
pub struct PatternAuditor {
    patterns: Vec<String>,
}

impl PatternAuditor {
    /// Creates an auditor over the given patterns.
    #[must_use]
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Stock pattern set for Lua entry files.
    #[must_use]
    pub fn lua_defaults() -> Self {
        Self::new([
            "os.execute",
            "io.popen",
            "loadstring",
            "dofile",
            "debug.",
        ])
    }
}

impl AuditHook for PatternAuditor {
    fn audit(&self, entry: &Path) -> Result<Vec<Finding>, AuditError> {
        let source = std::fs::read_to_string(entry).map_err(|source| AuditError::Unreadable {
            path: entry.display().to_string(),
            source,
        })?;

        let mut findings = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            let lowered = line.to_lowercase();
            for pattern in &self.patterns {
                if lowered.contains(&pattern.to_lowercase()) {
                    findings.push(Finding {
                        pattern: pattern.clone(),
                        line: idx + 1,
                        excerpt: line.trim().to_string(),
                    });
                }
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_entry(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("init.lua");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(content.as_bytes()).expect("write");
        (dir, path)
    }

    #[test]
    fn clean_source_passes() {
        let (_dir, path) = write_entry("function Plugin(api)\n  return {}\nend\n");
        let findings = PatternAuditor::lua_defaults().audit(&path).expect("audit");
        assert!(findings.is_empty());
    }

    #[test]
    fn banned_call_reported_with_line() {
        let (_dir, path) = write_entry("local x = 1\nos.execute('ls')\n");
        let findings = PatternAuditor::lua_defaults().audit(&path).expect("audit");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 2);
        assert_eq!(findings[0].pattern, "os.execute");
    }

    #[test]
    fn match_is_case_insensitive() {
        let (_dir, path) = write_entry("OS.EXECUTE('x')\n");
        let findings = PatternAuditor::lua_defaults().audit(&path).expect("audit");
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn multiple_findings_collected() {
        let (_dir, path) = write_entry("io.popen('a')\ndofile('b')\n");
        let findings = PatternAuditor::lua_defaults().audit(&path).expect("audit");
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn missing_entry_is_audit_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = PatternAuditor::lua_defaults().audit(&dir.path().join("ghost.lua"));
        assert!(matches!(result, Err(AuditError::Unreadable { .. })));
    }

    #[test]
    fn custom_pattern_set() {
        let (_dir, path) = write_entry("eval('2+2')\n");
        let findings = PatternAuditor::new(["eval("]).audit(&path).expect("audit");
        assert_eq!(findings.len(), 1);
    }
}
