//! Canned inventory for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vmsync_inventory::LiveVm;

use super::{ConnectionError, InventoryProvider};
use crate::config::HypervisorConfig;

/// Provider serving per-host VM lists set by the caller.
///
/// Hosts without a list report an empty inventory. A host can be made to
/// fail, and every call can be delayed to simulate a slow hypervisor.
#[derive(Default)]
pub struct StaticInventory {
    hosts: RwLock<HashMap<String, Result<Vec<LiveVm>, ConnectionError>>>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl StaticInventory {
    /// Create a provider with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider whose every call takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Replace the inventory of `host`.
    pub async fn set_vms(&self, host: &str, vms: Vec<LiveVm>) {
        self.hosts.write().await.insert(host.to_string(), Ok(vms));
    }

    /// Make every listing of `host` fail with `error`.
    pub async fn fail_host(&self, host: &str, error: ConnectionError) {
        self.hosts.write().await.insert(host.to_string(), Err(error));
    }

    /// Number of `list_vms` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
    async fn list_vms(
        &self,
        host: &HypervisorConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<LiveVm>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let hosts = self.hosts.read().await;
        let result = hosts.get(&host.host).cloned().unwrap_or(Ok(Vec::new()));
        debug!(host = %host.host, ok = result.is_ok(), "[STATIC] Listing VMs");
        result
    }
}
