//! Reconciliation engine.
//!
//! The engine is responsible for:
//! - Reading the live inventory of one hypervisor host
//! - Diffing it against the records stored for that host
//! - Creating, refreshing and orphaning records
//! - Reporting renames and reactivations for propagation
//!
//! Every VM is an independent unit of work: a failed write is counted and the
//! remaining VMs are still processed.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vmsync_inventory::{
    CycleResult, LiveVm, OrphanEntry, RenameEvent, SelectiveSyncResult, VmIdentity, VmRecord,
    WritePath,
};
use vmsync_reconcile::{diff_keys, merge_observation, UuidIndex};

use crate::cache::CacheError;
use crate::config::HypervisorConfig;
use crate::db::{RecordStore, StoreError};
use crate::provider::{ConnectionError, InventoryProvider};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a host's sync.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("inventory unavailable: {0}")]
    Connection(#[from] ConnectionError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("session cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("sync cancelled")]
    Cancelled,
}

/// Outcome of reconciling one host, with the deltas to propagate.
#[derive(Debug, Clone)]
pub struct HostSync {
    pub result: CycleResult,

    /// Orphaned records written this cycle, newly or previously orphaned.
    pub orphans: Vec<OrphanEntry>,
}

/// Outcome of an ad-hoc sync of selected VMs on one host.
#[derive(Debug, Clone)]
pub struct SelectiveSync {
    pub result: SelectiveSyncResult,
    pub renamed: Vec<RenameEvent>,
    pub reactivated: Vec<String>,
}

/// Diffs live inventory against stored records and applies the writes.
pub struct ReconciliationEngine {
    provider: Arc<dyn InventoryProvider>,
    store: Arc<dyn RecordStore>,
}

impl ReconciliationEngine {
    /// Create a new engine.
    pub fn new(provider: Arc<dyn InventoryProvider>, store: Arc<dyn RecordStore>) -> Self {
        Self { provider, store }
    }

    /// Reconcile every VM of `host`.
    ///
    /// Fails only when the host's inventory or stored records cannot be read,
    /// or when `cancel` fires. Writes applied before cancellation stand.
    #[instrument(skip(self, host, cancel), fields(host = %host.host))]
    pub async fn reconcile_host(
        &self,
        host: &HypervisorConfig,
        cancel: &CancellationToken,
    ) -> SyncResult<HostSync> {
        let live = self.list_live(host, cancel).await?;
        let stored = guarded(cancel, self.store.query_by_host(&host.host)).await??;

        let live = UuidIndex::build(live, |vm| vm.uuid.as_ref());
        let stored = UuidIndex::build(stored, |record| record.uuid.as_ref());
        if live.without_uuid > 0 || stored.without_uuid > 0 {
            warn!(
                live_skipped = live.without_uuid,
                stored_skipped = stored.without_uuid,
                "Skipping VMs without a usable UUID"
            );
        }

        let diff = diff_keys(&stored.keys(), &live.keys());
        debug!(
            orphaned = diff.orphaned.len(),
            added = diff.added.len(),
            common = diff.common.len(),
            "Computed inventory diff"
        );

        let mut sync = HostSync {
            result: CycleResult::new(&host.host),
            orphans: Vec::new(),
        };

        for uuid in &diff.added {
            ensure_active(cancel)?;
            let vm = &live.by_uuid[uuid];
            let record = VmRecord::from_live(&host.host, vm, Utc::now());

            match guarded(cancel, self.store.create(&record)).await? {
                Ok(()) => sync.result.record_success(WritePath::Add),
                Err(e) => {
                    warn!(
                        uuid = %uuid,
                        name = %vm.name,
                        error = %e,
                        rejected = e.is_rejection(),
                        "Failed to create VM record"
                    );
                    sync.result.record_failure(WritePath::Add);
                }
            }
        }

        for uuid in &diff.orphaned {
            ensure_active(cancel)?;
            let mut record = stored.by_uuid[uuid].clone();
            let newly = record.mark_orphaned(Utc::now());

            match guarded(cancel, self.store.update(&record)).await? {
                Ok(()) => {
                    if newly {
                        info!(uuid = %uuid, name = %record.name, "VM orphaned");
                    }
                    sync.result.record_success(WritePath::Orphan);
                    sync.orphans.push(record.orphan_entry());
                }
                Err(e) => {
                    warn!(
                        uuid = %uuid,
                        name = %record.name,
                        error = %e,
                        rejected = e.is_rejection(),
                        "Failed to orphan VM record"
                    );
                    sync.result.record_failure(WritePath::Orphan);
                }
            }
        }

        for uuid in &diff.common {
            ensure_active(cancel)?;
            let vm = &live.by_uuid[uuid];
            let identity = VmIdentity::Uuid(uuid.clone());

            let current = match guarded(cancel, self.store.get(&identity)).await? {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(uuid = %uuid, "VM record vanished before update");
                    sync.result.record_failure(WritePath::Update);
                    continue;
                }
                Err(e) => {
                    warn!(uuid = %uuid, error = %e, "Failed to read VM record");
                    sync.result.record_failure(WritePath::Update);
                    continue;
                }
            };

            let outcome = merge_observation(&host.host, &current, vm, Utc::now());
            match guarded(cancel, self.store.update(&outcome.record)).await? {
                Ok(()) => {
                    sync.result.record_success(WritePath::Update);
                    if let Some(rename) = outcome.rename {
                        info!(uuid = %uuid, old_name = %rename.old_name, new_name = %rename.new_name, "VM renamed");
                        sync.result.renamed.push(rename);
                    }
                    if outcome.reactivated {
                        info!(uuid = %uuid, name = %outcome.record.name, "VM reactivated");
                        sync.result.reactivated.push(outcome.record.name);
                    }
                }
                Err(e) => {
                    warn!(
                        uuid = %uuid,
                        name = %vm.name,
                        error = %e,
                        rejected = e.is_rejection(),
                        "Failed to update VM record"
                    );
                    sync.result.record_failure(WritePath::Update);
                }
            }
        }

        info!(
            added = sync.result.added,
            updated = sync.result.updated,
            orphaned = sync.result.orphaned,
            failures = sync.result.failures(),
            renamed = sync.result.renamed.len(),
            reactivated = sync.result.reactivated.len(),
            "Host reconciled"
        );

        Ok(sync)
    }

    /// Create or refresh the VMs of `host` matching any of `selectors`
    /// (UUID or name), without orphan detection.
    #[instrument(skip(self, host, selectors, cancel), fields(host = %host.host))]
    pub async fn sync_selected(
        &self,
        host: &HypervisorConfig,
        selectors: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<SelectiveSync> {
        let live = self.list_live(host, cancel).await?;

        let mut sync = SelectiveSync {
            result: SelectiveSyncResult::new(&host.host),
            renamed: Vec::new(),
            reactivated: Vec::new(),
        };

        let matched = live
            .iter()
            .filter(|vm| selectors.iter().any(|s| vm.matches_selector(s)));

        for vm in matched {
            ensure_active(cancel)?;
            sync.result.matched += 1;

            let Some(identity) = VmIdentity::resolve(vm.uuid.as_ref(), &vm.name) else {
                warn!(name = %vm.name, "Selected VM has no usable identity");
                sync.result.record_failure();
                continue;
            };

            let existing = match guarded(cancel, self.store.get(&identity)).await? {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(identity = %identity, error = %e, "Failed to read VM record");
                    sync.result.record_failure();
                    continue;
                }
            };

            let Some(current) = existing else {
                let record = VmRecord::from_live(&host.host, vm, Utc::now());
                match guarded(cancel, self.store.create(&record)).await? {
                    Ok(()) => sync.result.added += 1,
                    Err(e) => {
                        warn!(
                            identity = %identity,
                            error = %e,
                            rejected = e.is_rejection(),
                            "Failed to create VM record"
                        );
                        sync.result.record_failure();
                    }
                }
                continue;
            };

            let outcome = merge_observation(&host.host, &current, vm, Utc::now());
            match guarded(cancel, self.store.update(&outcome.record)).await? {
                Ok(()) => {
                    sync.result.updated += 1;
                    sync.renamed.extend(outcome.rename);
                    if outcome.reactivated {
                        sync.reactivated.push(outcome.record.name);
                    }
                }
                Err(e) => {
                    warn!(
                        identity = %identity,
                        error = %e,
                        rejected = e.is_rejection(),
                        "Failed to update VM record"
                    );
                    sync.result.record_failure();
                }
            }
        }

        info!(
            matched = sync.result.matched,
            added = sync.result.added,
            updated = sync.result.updated,
            failed = sync.result.failed,
            "Selected VMs synced"
        );

        Ok(sync)
    }

    async fn list_live(
        &self,
        host: &HypervisorConfig,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<LiveVm>> {
        match self.provider.list_vms(host, cancel).await {
            Ok(vms) => {
                debug!(vm_count = vms.len(), "Fetched live inventory");
                Ok(vms)
            }
            Err(ConnectionError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Failed to read host inventory");
                Err(e.into())
            }
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Race a store call against cancellation.
///
/// The outer result is the cancellation; the inner one is the store's.
async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> SyncResult<Result<T, StoreError>>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = call => Ok(result),
    }
}
