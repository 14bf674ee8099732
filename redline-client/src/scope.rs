//! Per-document log scope.
//!
//! Every component of a check session receives the same [`LogScope`] at
//! construction and prefixes its log records with it, so output from
//! several open documents stays separable without any process-wide state
//! beyond the `log` facade itself.

use std::fmt;
use std::sync::Arc;

/// Cheaply clonable label attached to log records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogScope(Arc<str>);

impl LogScope {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(Arc::from(label.as_ref()))
    }

    /// Child scope, e.g. `doc-1/transport`.
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}/{name}", self.0))
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for LogScope {
    fn default() -> Self {
        Self::new("redline")
    }
}
