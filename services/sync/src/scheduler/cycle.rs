//! One sync pass over every configured host.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use vmsync_inventory::{CycleResult, OrphanEntry, RenameEvent, SelectiveSyncResult};

use crate::config::HypervisorConfig;
use crate::engine::{ReconciliationEngine, SyncError, SyncResult};
use crate::notify::Dispatcher;
use crate::propagator::Propagator;

/// Runs the engine, propagator and dispatcher for each host in turn.
pub struct SyncCoordinator {
    hosts: Vec<HypervisorConfig>,
    engine: ReconciliationEngine,
    propagator: Arc<Propagator>,
    dispatcher: Dispatcher,
}

impl SyncCoordinator {
    pub fn new(
        hosts: Vec<HypervisorConfig>,
        engine: ReconciliationEngine,
        propagator: Arc<Propagator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            hosts,
            engine,
            propagator,
            dispatcher,
        }
    }

    /// Reconcile every host sequentially.
    ///
    /// A host that cannot be read yields a failed result; the other hosts are
    /// still processed. Only cancellation ends the pass early.
    #[instrument(skip(self, cancel), fields(hosts = self.hosts.len()))]
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> SyncResult<Vec<CycleResult>> {
        let mut results = Vec::with_capacity(self.hosts.len());

        for host in &self.hosts {
            let sync = match self.engine.reconcile_host(host, cancel).await {
                Ok(sync) => sync,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(host = %host.host, error = %e, "Host sync failed");
                    results.push(CycleResult::unreachable(&host.host, &e));
                    continue;
                }
            };

            self.propagate(
                &sync.orphans,
                &sync.result.reactivated,
                &sync.result.renamed,
                cancel,
            )
            .await?;
            results.push(sync.result);
        }

        Ok(results)
    }

    /// Create or refresh the selected VMs on every host.
    #[instrument(skip(self, selectors, cancel), fields(selectors = selectors.len()))]
    pub async fn sync_selected(
        &self,
        selectors: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<SelectiveSyncResult>> {
        let mut results = Vec::with_capacity(self.hosts.len());

        for host in &self.hosts {
            let sync = match self.engine.sync_selected(host, selectors, cancel).await {
                Ok(sync) => sync,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(host = %host.host, error = %e, "Selective sync failed");
                    results.push(SelectiveSyncResult::unreachable(&host.host, &e));
                    continue;
                }
            };

            self.propagate(&[], &sync.reactivated, &sync.renamed, cancel)
                .await?;
            results.push(sync.result);
        }

        Ok(results)
    }

    /// Push one host's deltas to sessions and downstream services.
    ///
    /// Renames are applied before reactivations, since reactivated names are
    /// the new names while session orphan lists still hold the old ones.
    /// Propagation failures are logged and never fail the host.
    async fn propagate(
        &self,
        orphans: &[OrphanEntry],
        reactivated: &[String],
        renamed: &[RenameEvent],
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        if let Err(e) = cancellable(cancel, self.propagator.propagate_orphans(orphans)).await? {
            warn!(error = %e, "Failed to propagate orphans to sessions");
        }

        if !renamed.is_empty() {
            let report = self.dispatcher.dispatch(renamed, cancel).await;
            info!(
                renames = renamed.len(),
                sessions = report.renamed_in_sessions,
                delivered = report.delivered(),
                calls = report.calls.len(),
                "Rename notifications dispatched"
            );
        }

        if let Err(e) =
            cancellable(cancel, self.propagator.propagate_reactivations(reactivated)).await?
        {
            warn!(error = %e, "Failed to propagate reactivations to sessions");
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> SyncResult<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = work => Ok(out),
    }
}
