//! Live observations and persisted VM records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InventoryError, OrphanEntry, PowerState, VmIdentity, VmUuid};

/// A VM as reported by the hypervisor during one inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveVm {
    pub name: String,

    /// Guest hostname; `None` when the guest tools could not report it.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Guest IP address; `None` when unknown.
    #[serde(default)]
    pub address: Option<String>,

    /// `None` when the VM has no readable configuration.
    #[serde(default)]
    pub uuid: Option<VmUuid>,

    #[serde(default)]
    pub power_state: PowerState,

    #[serde(default)]
    pub tools_status: String,
}

impl LiveVm {
    /// Whether an operator-supplied identifier selects this VM.
    pub fn matches_selector(&self, selector: &str) -> bool {
        self.name == selector || self.uuid.as_ref().is_some_and(|u| u.as_str() == selector)
    }
}

/// A VM record as persisted in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub uuid: Option<VmUuid>,
    pub name: String,

    /// Address of the hypervisor host that owns this VM.
    pub host_address: String,

    pub hostname: Option<String>,
    pub address: Option<String>,
    pub power_state: PowerState,
    pub tools_status: String,
    pub orphan: bool,
    pub orphan_since: Option<DateTime<Utc>>,
    pub last_sync_time: DateTime<Utc>,
}

impl VmRecord {
    /// Build a fresh, active record from a live observation.
    pub fn from_live(host_address: &str, vm: &LiveVm, now: DateTime<Utc>) -> Self {
        Self {
            uuid: vm.uuid.clone(),
            name: vm.name.clone(),
            host_address: host_address.to_string(),
            hostname: vm.hostname.clone(),
            address: vm.address.clone(),
            power_state: vm.power_state.clone(),
            tools_status: vm.tools_status.clone(),
            orphan: false,
            orphan_since: None,
            last_sync_time: now,
        }
    }

    /// The key this record is stored under, if it has one.
    pub fn identity(&self) -> Option<VmIdentity> {
        VmIdentity::resolve(self.uuid.as_ref(), &self.name)
    }

    /// Check the record is persistable and return its identity.
    pub fn validate(&self) -> Result<VmIdentity, InventoryError> {
        self.identity().ok_or_else(|| InventoryError::MissingIdentity {
            host_address: self.host_address.clone(),
        })
    }

    /// Mark the record as orphaned.
    ///
    /// `orphan_since` is only set on the active → orphaned transition;
    /// `last_sync_time` is always refreshed. Returns true if the record was
    /// newly orphaned.
    pub fn mark_orphaned(&mut self, now: DateTime<Utc>) -> bool {
        self.last_sync_time = now;
        if self.orphan {
            return false;
        }
        self.orphan = true;
        self.orphan_since = Some(now);
        true
    }

    /// Return an orphaned record to the active state.
    ///
    /// Returns true if the record was orphaned.
    pub fn reactivate(&mut self) -> bool {
        if !self.orphan {
            return false;
        }
        self.orphan = false;
        self.orphan_since = None;
        true
    }

    /// The entry that represents this record in session orphan lists.
    pub fn orphan_entry(&self) -> OrphanEntry {
        OrphanEntry::new(self.name.clone(), self.orphan_since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn live(uuid: Option<&str>, name: &str) -> LiveVm {
        LiveVm {
            name: name.to_string(),
            hostname: Some(format!("{name}.lan")),
            address: Some("10.0.0.5".to_string()),
            uuid: uuid.map(|u| VmUuid::parse(u).unwrap()),
            power_state: PowerState::On,
            tools_status: "toolsOk".to_string(),
        }
    }

    #[test]
    fn test_from_live_is_active() {
        let now = Utc::now();
        let record = VmRecord::from_live("esxi-1", &live(Some("u1"), "vm1"), now);

        assert!(!record.orphan);
        assert_eq!(record.orphan_since, None);
        assert_eq!(record.last_sync_time, now);
        assert_eq!(record.host_address, "esxi-1");
        assert_eq!(record.power_state, PowerState::On);
    }

    #[test]
    fn test_orphan_since_set_once() {
        let first = Utc::now();
        let later = first + Duration::seconds(300);
        let mut record = VmRecord::from_live("esxi-1", &live(Some("u1"), "vm1"), first);

        assert!(record.mark_orphaned(first));
        assert!(!record.mark_orphaned(later));

        assert!(record.orphan);
        assert_eq!(record.orphan_since, Some(first));
        assert_eq!(record.last_sync_time, later);
    }

    #[test]
    fn test_reactivate_clears_orphan_since() {
        let now = Utc::now();
        let mut record = VmRecord::from_live("esxi-1", &live(Some("u1"), "vm1"), now);

        assert!(!record.reactivate());
        record.mark_orphaned(now);
        assert!(record.reactivate());
        assert!(!record.orphan);
        assert_eq!(record.orphan_since, None);
    }

    #[test]
    fn test_validate_requires_identity() {
        let now = Utc::now();
        let record = VmRecord::from_live("esxi-1", &live(None, ""), now);
        assert_eq!(
            record.validate(),
            Err(InventoryError::MissingIdentity {
                host_address: "esxi-1".to_string()
            })
        );

        let by_name = VmRecord::from_live("esxi-1", &live(None, "vm1"), now);
        assert_eq!(by_name.validate(), Ok(VmIdentity::Name("vm1".to_string())));
    }

    #[test]
    fn test_matches_selector() {
        let vm = live(Some("u1"), "vm1");
        assert!(vm.matches_selector("u1"));
        assert!(vm.matches_selector("vm1"));
        assert!(!vm.matches_selector("vm2"));
    }
}
