//! Inventory gateway client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use vmsync_inventory::{known_value, LiveVm, PowerState, VmUuid};

use super::{ConnectionError, InventoryProvider};
use crate::config::HypervisorConfig;

/// One VM as listed by the gateway.
///
/// Every field but `name` may be missing or hold a placeholder such as
/// `"unknown"`; placeholders are normalised to `None` here.
#[derive(Debug, Deserialize)]
struct GatewayVm {
    name: String,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    power_state: Option<String>,
    #[serde(default)]
    tools_status: Option<String>,
}

impl From<GatewayVm> for LiveVm {
    fn from(vm: GatewayVm) -> Self {
        Self {
            hostname: known_value(vm.hostname.as_deref()),
            address: known_value(vm.ip_address.as_deref()),
            uuid: VmUuid::from_observed(vm.uuid.as_deref()),
            power_state: vm
                .power_state
                .as_deref()
                .map(PowerState::from_observed)
                .unwrap_or_default(),
            tools_status: vm.tools_status.unwrap_or_default(),
            name: vm.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VmList {
    vms: Vec<GatewayVm>,
}

/// Reads `GET {inventory_url}/vms` with the host's credentials.
pub struct HttpInventoryProvider {
    client: reqwest::Client,
}

impl HttpInventoryProvider {
    /// Create a provider whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, host: &HypervisorConfig) -> Result<Vec<LiveVm>, ConnectionError> {
        let url = format!("{}/vms", host.inventory_url.trim_end_matches('/'));
        debug!(host = %host.host, url = %url, "Fetching VM inventory");

        let response = self
            .client
            .get(&url)
            .basic_auth(&host.username, Some(host.password.expose()))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConnectionError::Auth(format!(
                "{} rejected credentials for {}",
                host.host, host.username
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(host = %host.host, status = %status, body = %body, "Inventory request failed");
            return Err(ConnectionError::Protocol(format!(
                "unexpected status {status} from {url}"
            )));
        }

        let list: VmList = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(format!("invalid inventory body: {e}")))?;

        Ok(list.vms.into_iter().map(LiveVm::from).collect())
    }
}

fn transport_error(e: reqwest::Error) -> ConnectionError {
    if e.is_timeout() {
        ConnectionError::Timeout(e.to_string())
    } else if e.is_decode() {
        ConnectionError::Protocol(e.to_string())
    } else {
        ConnectionError::Network(e.to_string())
    }
}

#[async_trait]
impl InventoryProvider for HttpInventoryProvider {
    async fn list_vms(
        &self,
        host: &HypervisorConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<LiveVm>, ConnectionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = self.fetch(host) => result,
        }
    }
}
