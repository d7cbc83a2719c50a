//! In-memory record store for testing and development.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use vmsync_inventory::{VmIdentity, VmRecord};

use super::{RecordStore, StoreError};

/// In-memory record store.
///
/// Mirrors the uniqueness rules of the Postgres store. Writes for selected VM
/// names can be made to fail, to exercise partial-failure paths.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<VmRecord>>,
    failing_names: Mutex<BTreeSet<String>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    pub fn with_records(records: Vec<VmRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing_names: Mutex::default(),
        }
    }

    /// Make every create/update of a record named `name` fail.
    pub async fn fail_writes_for(&self, name: &str) {
        self.failing_names.lock().await.insert(name.to_string());
    }

    /// Snapshot of all records.
    pub async fn records(&self) -> Vec<VmRecord> {
        self.records.lock().await.clone()
    }

    async fn check_writable(&self, record: &VmRecord) -> Result<VmIdentity, StoreError> {
        let identity = record.validate()?;
        if self.failing_names.lock().await.contains(&record.name) {
            return Err(StoreError::Unavailable(format!(
                "write rejected for '{}'",
                record.name
            )));
        }
        Ok(identity)
    }
}

fn has_identity(record: &VmRecord, identity: &VmIdentity) -> bool {
    match identity {
        VmIdentity::Uuid(uuid) => record.uuid.as_ref() == Some(uuid),
        VmIdentity::Name(name) => record.uuid.is_none() && &record.name == name,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, identity: &VmIdentity) -> Result<Option<VmRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| has_identity(r, identity)).cloned())
    }

    async fn create(&self, record: &VmRecord) -> Result<(), StoreError> {
        let identity = self.check_writable(record).await?;

        let mut records = self.records.lock().await;
        if records.iter().any(|r| has_identity(r, &identity)) {
            return Err(StoreError::Duplicate(identity.to_string()));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &VmRecord) -> Result<(), StoreError> {
        let identity = self.check_writable(record).await?;

        let mut records = self.records.lock().await;
        let slot = records
            .iter_mut()
            .find(|r| has_identity(r, &identity))
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))?;
        *slot = record.clone();
        Ok(())
    }

    async fn query_by_host(&self, host_address: &str) -> Result<Vec<VmRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.host_address == host_address)
            .cloned()
            .collect())
    }
}
