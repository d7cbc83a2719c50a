//! Session blobs stored in the session cache.
//!
//! A session scopes which VM names a user can see. Sessions are created and
//! expired by another service; vmsync only rewrites their membership sets.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrphanEntry, RenameEvent};

/// Decoded session blob.
///
/// Fields other than `vms` and `orphans` belong to the issuing service and are
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// VM names currently visible to the session.
    #[serde(default)]
    pub vms: BTreeSet<String>,

    /// Orphaned VM names, keyed by name, with the time they went missing.
    #[serde(default, with = "orphan_list")]
    pub orphans: BTreeMap<String, Option<DateTime<Utc>>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Decode a raw cache value.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Move visible VMs that went missing into the orphan list.
    ///
    /// An existing orphan entry with the same name is kept as is. Returns true
    /// if the session changed.
    pub fn apply_orphans(&mut self, orphans: &[OrphanEntry]) -> bool {
        let mut changed = false;
        for entry in orphans {
            if !self.vms.remove(&entry.name) {
                continue;
            }
            changed = true;
            self.orphans
                .entry(entry.name.clone())
                .or_insert(entry.orphan_since);
        }
        changed
    }

    /// Move reactivated VMs from the orphan list back into `vms`.
    ///
    /// Returns true if the session changed.
    pub fn apply_reactivations(&mut self, names: &BTreeSet<String>) -> bool {
        let back_online: Vec<String> = self
            .orphans
            .keys()
            .filter(|name| names.contains(*name))
            .cloned()
            .collect();

        for name in &back_online {
            self.orphans.remove(name);
            self.vms.insert(name.clone());
        }
        !back_online.is_empty()
    }

    /// Replace renamed VMs in place, in both `vms` and `orphans`.
    ///
    /// Returns the renames that matched this session.
    pub fn apply_renames(&mut self, renames: &[RenameEvent]) -> Vec<RenameEvent> {
        let mut applied = Vec::new();
        for rename in renames {
            let mut hit = false;
            if self.vms.remove(&rename.old_name) {
                self.vms.insert(rename.new_name.clone());
                hit = true;
            }
            if let Some(since) = self.orphans.remove(&rename.old_name) {
                self.orphans.insert(rename.new_name.clone(), since);
                hit = true;
            }
            if hit {
                applied.push(rename.clone());
            }
        }
        applied
    }
}

/// Orphans are a list of `{name, orphan_since}` objects on the wire.
///
/// Older blobs may hold bare names or day-first timestamps; both are accepted.
mod orphan_list {
    use std::collections::BTreeMap;

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::OrphanEntry;

    const LEGACY_TIMESTAMP: &str = "%d-%m-%Y: %H:%M:%S";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Item {
        Entry {
            name: String,
            #[serde(default, deserialize_with = "lenient_timestamp")]
            orphan_since: Option<DateTime<Utc>>,
        },
        Name(String),
    }

    pub fn serialize<S: Serializer>(
        orphans: &BTreeMap<String, Option<DateTime<Utc>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            orphans
                .iter()
                .map(|(name, since)| OrphanEntry::new(name.clone(), *since)),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Option<DateTime<Utc>>>, D::Error> {
        let items = Vec::<Item>::deserialize(deserializer)?;
        let mut out = BTreeMap::new();
        for item in items {
            let (name, since) = match item {
                Item::Entry { name, orphan_since } => (name, orphan_since),
                Item::Name(name) => (name, None),
            };
            out.entry(name).or_insert(since);
        }
        Ok(out)
    }

    fn lenient_timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        let Some(text) = raw.as_ref().and_then(serde_json::Value::as_str) else {
            return Ok(None);
        };

        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        Ok(NaiveDateTime::parse_from_str(text, LEGACY_TIMESTAMP)
            .ok()
            .map(|ts| ts.and_utc()))
    }
}
