//! Collection name patterns.

use crate::error::{SyncError, SyncResult};

/// A comma-separated list of glob patterns, e.g. `logs-*,metrics-2019-*`.
///
/// Names starting with `.` are internal and only match a pattern that
/// itself starts with `.`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    globs: Vec<glob::Pattern>,
}

impl NamePattern {
    /// Parses a pattern list. `*` and `_all` match every visible name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] for an empty list or a bad glob.
    pub fn parse(pattern: &str) -> SyncResult<Self> {
        let globs = pattern
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| if p == "_all" { "*" } else { p })
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| SyncError::InvalidRequest(format!("invalid pattern {p:?}: {e}")))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        if globs.is_empty() {
            return Err(SyncError::InvalidRequest("empty indices pattern".to_string()));
        }
        Ok(Self { globs })
    }

    /// Returns true if `name` matches any pattern in the list.
    pub fn matches(&self, name: &str) -> bool {
        self.globs.iter().any(|glob| {
            if name.starts_with('.') && !glob.as_str().starts_with('.') {
                return false;
            }
            glob.matches(name)
        })
    }
}
