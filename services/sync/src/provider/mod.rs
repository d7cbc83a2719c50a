//! Hypervisor inventory providers.
//!
//! A provider returns the live VM list of one hypervisor host. Two
//! implementations are provided:
//! - [`HttpInventoryProvider`] reads the JSON VM list exposed by an inventory
//!   gateway in front of the host
//! - [`StaticInventory`] serves canned lists for tests and development

mod http;
mod static_inventory;

pub use http::HttpInventoryProvider;
pub use static_inventory::StaticInventory;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use vmsync_inventory::LiveVm;

use crate::config::HypervisorConfig;

/// Failure to read a host's inventory. Degrades that host's cycle only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("connection timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("inventory request cancelled")]
    Cancelled,
}

/// Source of live VM snapshots.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// List every VM currently registered on `host`.
    async fn list_vms(
        &self,
        host: &HypervisorConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<LiveVm>, ConnectionError>;
}
