//! Deltas produced by a reconciliation cycle and consumed within the same cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A VM whose display name changed while its UUID stayed the same.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RenameEvent {
    pub old_name: String,
    pub new_name: String,
}

impl RenameEvent {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }
}

/// A VM that is no longer observed on its host.
///
/// Also the shape of an entry in a session's `orphans` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub name: String,
    #[serde(default)]
    pub orphan_since: Option<DateTime<Utc>>,
}

impl OrphanEntry {
    pub fn new(name: impl Into<String>, orphan_since: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            orphan_since,
        }
    }
}
