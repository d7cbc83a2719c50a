//! Inventory reconciliation primitives.
//!
//! This library holds the pure half of a sync cycle: given what the record
//! store holds for a host and what the hypervisor reports right now, decide
//! which records to create, refresh and orphan, and how a stored record
//! absorbs a fresh observation. Nothing here performs I/O.
//!
//! - **Stored state**: records from the record store, keyed by UUID.
//! - **Live state**: the hypervisor's current VM list, keyed by UUID.
//! - **Convergence**: every live VM has an active record, every stored VM not
//!   seen live is orphaned.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs (keys come out sorted)
//! - Applying the same observation twice yields the same record, apart from
//!   `last_sync_time`
//! - Values the provider could not report never overwrite known values

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use vmsync_inventory::{LiveVm, RenameEvent, VmRecord, VmUuid};

/// Classification of UUID keys between stored and live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDiff<K> {
    /// Stored but not live: to be orphaned.
    pub orphaned: Vec<K>,

    /// Live but not stored: to be created.
    pub added: Vec<K>,

    /// Present on both sides: to be refreshed.
    pub common: Vec<K>,
}

/// Split keys into orphaned, added and common sets.
pub fn diff_keys<K: Ord + Clone>(stored: &BTreeSet<K>, live: &BTreeSet<K>) -> KeyDiff<K> {
    KeyDiff {
        orphaned: stored.difference(live).cloned().collect(),
        added: live.difference(stored).cloned().collect(),
        common: stored.intersection(live).cloned().collect(),
    }
}

/// Items keyed by UUID, plus the number of items that had none.
#[derive(Debug, Clone)]
pub struct UuidIndex<T> {
    pub by_uuid: BTreeMap<VmUuid, T>,
    pub without_uuid: usize,
}

impl<T> UuidIndex<T> {
    /// Index `items` by the UUID `key` returns.
    ///
    /// Items without a UUID are counted and dropped; on duplicate UUIDs the
    /// first item wins.
    pub fn build<I, F>(items: I, key: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> Option<&VmUuid>,
    {
        let mut by_uuid = BTreeMap::new();
        let mut without_uuid = 0;

        for item in items {
            match key(&item).cloned() {
                Some(uuid) => {
                    by_uuid.entry(uuid).or_insert(item);
                }
                None => without_uuid += 1,
            }
        }

        Self {
            by_uuid,
            without_uuid,
        }
    }

    /// The set of indexed UUIDs.
    pub fn keys(&self) -> BTreeSet<VmUuid> {
        self.by_uuid.keys().cloned().collect()
    }
}

/// Result of merging a live observation into a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The record to write back.
    pub record: VmRecord,

    /// Set when the display name changed.
    pub rename: Option<RenameEvent>,

    /// True when the stored record was orphaned and is now active again.
    pub reactivated: bool,
}

/// Merge a live observation into the stored record for the same VM.
///
/// Live values win, except `hostname` and `address`, which keep their last
/// known value when the provider reports them as unknown. An orphaned record
/// is reactivated, and the owning host is taken from `host_address`.
pub fn merge_observation(
    host_address: &str,
    stored: &VmRecord,
    live: &LiveVm,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut record = stored.clone();

    record.host_address = host_address.to_string();
    if live.uuid.is_some() {
        record.uuid = live.uuid.clone();
    }
    record.hostname = live.hostname.clone().or_else(|| stored.hostname.clone());
    record.address = live.address.clone().or_else(|| stored.address.clone());
    record.power_state = live.power_state.clone();
    record.tools_status = live.tools_status.clone();
    record.last_sync_time = now;

    let rename = (stored.name != live.name).then(|| {
        record.name = live.name.clone();
        RenameEvent::new(stored.name.clone(), live.name.clone())
    });

    let reactivated = record.reactivate();

    MergeOutcome {
        record,
        rename,
        reactivated,
    }
}
