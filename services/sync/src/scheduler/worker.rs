//! Scheduler background worker.
//!
//! Runs a sync cycle whenever the interval elapses or a manual trigger fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vmsync_inventory::CycleResult;

use super::cycle::SyncCoordinator;
use super::state::{FlightGuard, SyncState};
use crate::config::SyncSettings;

/// How long a cancelled cycle may take to wind down before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Scheduler worker that drives sync cycles.
pub struct SchedulerWorker {
    coordinator: Arc<SyncCoordinator>,
    state: Arc<SyncState>,
    settings: SyncSettings,
    grace: Duration,
}

impl SchedulerWorker {
    /// Create a new scheduler worker.
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        state: Arc<SyncState>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            coordinator,
            state,
            settings,
            grace: CANCEL_GRACE,
        }
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            timeout_secs = self.settings.timeout.as_secs(),
            "Starting scheduler worker"
        );

        loop {
            let manual = tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {
                    debug!("Sync interval elapsed");
                    false
                }
                _ = self.state.triggered() => {
                    info!("Manual sync triggered");
                    true
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                    continue;
                }
            };

            let Some(guard) = self.state.try_begin() else {
                if !manual {
                    info!("Sync already in progress, skipping cycle");
                    continue;
                }

                // An ad-hoc sync holds the guard; serve the trigger once it ends.
                info!("Sync already in progress, deferring manual trigger");
                self.state.requeue();
                tokio::select! {
                    _ = self.state.idle() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Scheduler worker shutting down");
                            break;
                        }
                    }
                }
                continue;
            };

            if !self.run_cycle(guard, &mut shutdown).await {
                info!("Scheduler worker shutting down");
                break;
            }
        }
    }

    /// Run one bounded cycle. Returns false if shutdown was signaled meanwhile.
    async fn run_cycle(
        &self,
        _guard: FlightGuard,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        self.state.clear_trigger();

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let mut task = tokio::spawn({
            let coordinator = Arc::clone(&self.coordinator);
            let cancel = cancel.clone();
            async move { coordinator.run_cycle(&cancel).await }
        });

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);

        let mut keep_running = true;
        let finished = loop {
            tokio::select! {
                joined = &mut task => break Some(joined),
                _ = &mut deadline => {
                    warn!(
                        timeout_secs = self.settings.timeout.as_secs(),
                        "Sync cycle timed out, cancelling"
                    );
                    break None;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, cancelling sync cycle");
                        keep_running = false;
                        break None;
                    }
                }
            }
        };

        match finished {
            Some(Ok(Ok(results))) => log_cycle(&results, started.elapsed()),
            Some(Ok(Err(e))) => warn!(error = %e, "Sync cycle aborted"),
            Some(Err(e)) => error!(error = %e, "Sync cycle task failed"),
            None => {
                cancel.cancel();
                match tokio::time::timeout(self.grace, &mut task).await {
                    Ok(_) => debug!("Sync cycle stopped after cancellation"),
                    Err(_) => {
                        warn!(
                            grace_secs = self.grace.as_secs(),
                            "Sync cycle ignored cancellation, aborting"
                        );
                        task.abort();
                        let _ = task.await;
                    }
                }
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Sync cycle ended early"
                );
            }
        }

        keep_running
    }
}

fn log_cycle(results: &[CycleResult], elapsed: Duration) {
    for result in results {
        info!(
            host = %result.host,
            ok = result.ok,
            added = result.added,
            updated = result.updated,
            orphaned = result.orphaned,
            added_failures = result.added_failures,
            updated_failures = result.updated_failures,
            orphaned_failures = result.orphaned_failures,
            reactivated = result.reactivated.len(),
            renamed = result.renamed.len(),
            error = result.error.as_deref().unwrap_or(""),
            "Host sync result"
        );
    }

    let failed_hosts = results.iter().filter(|r| !r.ok).count();
    info!(
        hosts = results.len(),
        failed_hosts,
        duration_ms = elapsed.as_millis() as u64,
        "Sync cycle complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySessionCache;
    use crate::config::{EndpointConfig, HypervisorConfig, Secret};
    use crate::db::MemoryRecordStore;
    use crate::engine::ReconciliationEngine;
    use crate::notify::Dispatcher;
    use crate::propagator::Propagator;
    use crate::provider::StaticInventory;

    fn coordinator(inventory: Arc<StaticInventory>) -> Arc<SyncCoordinator> {
        let cache = Arc::new(MemorySessionCache::new());
        let propagator = Arc::new(Propagator::new(cache));
        let endpoints = EndpointConfig {
            group_rename_url: "http://127.0.0.1:1/groups".to_string(),
            identity_rename_url: "http://127.0.0.1:1/identity".to_string(),
            timeout: Duration::from_secs(1),
        };
        let host = HypervisorConfig {
            host: "esxi-1".to_string(),
            port: 443,
            username: "root".to_string(),
            password: Secret::new("pw"),
            inventory_url: "http://esxi-1/inventory".to_string(),
        };

        Arc::new(SyncCoordinator::new(
            vec![host],
            ReconciliationEngine::new(inventory, Arc::new(MemoryRecordStore::new())),
            propagator.clone(),
            Dispatcher::new(endpoints, propagator).unwrap(),
        ))
    }

    fn settings(interval_secs: u64, timeout_secs: u64) -> SyncSettings {
        SyncSettings {
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
            host_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn spawn_worker(
        inventory: Arc<StaticInventory>,
        state: Arc<SyncState>,
        settings: SyncSettings,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = SchedulerWorker::new(coordinator(inventory), state, settings);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
        (shutdown_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval() {
        let inventory = Arc::new(StaticInventory::new());
        let state = Arc::new(SyncState::new());
        let (shutdown, handle) = spawn_worker(inventory.clone(), state, settings(10, 60));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(inventory.calls(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(inventory.calls(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_during_cycle_coalesce() {
        let inventory = Arc::new(StaticInventory::with_delay(Duration::from_secs(5)));
        let state = Arc::new(SyncState::new());
        let (shutdown, handle) =
            spawn_worker(inventory.clone(), state.clone(), settings(1000, 60));

        state.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(state.in_progress());

        state.trigger();
        state.trigger();
        state.trigger();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(inventory.calls(), 2);
        assert!(!state.in_progress());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_clears_in_progress() {
        let inventory = Arc::new(StaticInventory::with_delay(Duration::from_secs(600)));
        let state = Arc::new(SyncState::new());
        let (shutdown, handle) =
            spawn_worker(inventory.clone(), state.clone(), settings(1000, 10));

        state.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(state.in_progress());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!state.in_progress());
        assert_eq!(inventory.calls(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_cycle_while_ad_hoc_sync_runs() {
        let inventory = Arc::new(StaticInventory::new());
        let state = Arc::new(SyncState::new());
        let guard = state.try_begin().unwrap();
        let (shutdown, handle) =
            spawn_worker(inventory.clone(), state.clone(), settings(1000, 60));

        state.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(inventory.calls(), 0);

        drop(guard);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(inventory.calls(), 1);
        assert!(!state.in_progress());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_skips_without_deferring() {
        let inventory = Arc::new(StaticInventory::new());
        let state = Arc::new(SyncState::new());
        let guard = state.try_begin().unwrap();
        let (shutdown, handle) =
            spawn_worker(inventory.clone(), state.clone(), settings(10, 60));

        tokio::time::sleep(Duration::from_secs(11)).await;
        drop(guard);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(inventory.calls(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(inventory.calls(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_running_cycle() {
        let inventory = Arc::new(StaticInventory::with_delay(Duration::from_secs(600)));
        let state = Arc::new(SyncState::new());
        let (shutdown, handle) =
            spawn_worker(inventory.clone(), state.clone(), settings(1000, 900));

        state.trigger();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(state.in_progress());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
        assert!(!state.in_progress());
    }
}
