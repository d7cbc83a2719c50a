//! Per-host outcomes of scheduled and ad-hoc syncs.

use serde::{Deserialize, Serialize};

use crate::RenameEvent;

/// The write path a record went through during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Add,
    Update,
    Orphan,
}

impl WritePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Orphan => "orphan",
        }
    }
}

/// Result of reconciling one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    pub host: String,
    pub ok: bool,
    pub added: u32,
    pub updated: u32,
    pub orphaned: u32,
    pub added_failures: u32,
    pub updated_failures: u32,
    pub orphaned_failures: u32,
    pub reactivated: Vec<String>,
    pub renamed: Vec<RenameEvent>,

    /// Set when the host could not be reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleResult {
    /// An empty, successful result for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ok: true,
            added: 0,
            updated: 0,
            orphaned: 0,
            added_failures: 0,
            updated_failures: 0,
            orphaned_failures: 0,
            reactivated: Vec::new(),
            renamed: Vec::new(),
            error: None,
        }
    }

    /// The result for a host whose inventory could not be read.
    pub fn unreachable(host: impl Into<String>, error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::new(host)
        }
    }

    pub fn record_success(&mut self, path: WritePath) {
        match path {
            WritePath::Add => self.added += 1,
            WritePath::Update => self.updated += 1,
            WritePath::Orphan => self.orphaned += 1,
        }
    }

    /// Count a failed write; the cycle is no longer ok.
    pub fn record_failure(&mut self, path: WritePath) {
        match path {
            WritePath::Add => self.added_failures += 1,
            WritePath::Update => self.updated_failures += 1,
            WritePath::Orphan => self.orphaned_failures += 1,
        }
        self.ok = false;
    }

    pub fn failures(&self) -> u32 {
        self.added_failures + self.updated_failures + self.orphaned_failures
    }
}

/// Result of an ad-hoc sync of selected VMs on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectiveSyncResult {
    pub host: String,
    pub ok: bool,
    pub matched: u32,
    pub added: u32,
    pub updated: u32,
    pub failed: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SelectiveSyncResult {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ok: true,
            matched: 0,
            added: 0,
            updated: 0,
            failed: 0,
            error: None,
        }
    }

    pub fn unreachable(host: impl Into<String>, error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::new(host)
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.ok = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_clears_ok() {
        let mut result = CycleResult::new("esxi-1");
        result.record_success(WritePath::Add);
        result.record_success(WritePath::Orphan);
        assert!(result.ok);

        result.record_failure(WritePath::Update);
        assert!(!result.ok);
        assert_eq!(result.added, 1);
        assert_eq!(result.orphaned, 1);
        assert_eq!(result.updated_failures, 1);
        assert_eq!(result.failures(), 1);
    }

    #[test]
    fn test_unreachable_reports_no_activity() {
        let result = CycleResult::unreachable("esxi-2", "connection refused");
        assert!(!result.ok);
        assert_eq!(result.added + result.updated + result.orphaned, 0);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_error_omitted_when_reachable() {
        let json = serde_json::to_value(CycleResult::new("esxi-1")).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["ok"], true);
    }
}
