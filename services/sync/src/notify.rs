//! Rename notifications.
//!
//! When a cycle renames VMs, sessions are updated first, then two downstream
//! services are told: one batched call to the group service and one call per
//! rename to the identity service. All calls run concurrently against a
//! shared deadline. Outcomes are reported, never retried, and never affect
//! the cycle result.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use vmsync_inventory::RenameEvent;

use crate::config::EndpointConfig;
use crate::propagator::Propagator;

const GROUP_TARGET: &str = "group_rename";
const IDENTITY_TARGET: &str = "identity_rename";

/// Failure of one downstream call.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("endpoint rejected notification with status {0}")]
    Rejected(u16),

    #[error("failed to send notification: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Final state of one downstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Delivered,
    Rejected(u16),
    Failed(String),
    TimedOut,
}

/// One downstream call and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// `group_rename`, or `identity_rename:<old name>`.
    pub target: String,
    pub status: CallStatus,
}

/// Everything a rename dispatch did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sessions rewritten by rename propagation.
    pub renamed_in_sessions: u32,
    pub calls: Vec<CallOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| c.status == CallStatus::Delivered)
            .count()
    }
}

/// Fans rename events out to sessions and downstream services.
pub struct Dispatcher {
    client: reqwest::Client,
    endpoints: EndpointConfig,
    propagator: Arc<Propagator>,
}

impl Dispatcher {
    pub fn new(
        endpoints: EndpointConfig,
        propagator: Arc<Propagator>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoints,
            propagator,
        })
    }

    /// Propagate `renames` to sessions, then notify downstream services.
    #[instrument(skip(self, renames, cancel), fields(renames = renames.len()))]
    pub async fn dispatch(
        &self,
        renames: &[RenameEvent],
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if renames.is_empty() {
            return report;
        }

        let propagation = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Rename dispatch cancelled before notifying services");
                return report;
            }
            propagation = self.propagator.propagate_renames(renames) => propagation,
        };
        match propagation {
            Ok(propagation) => report.renamed_in_sessions = propagation.stats.modified,
            Err(e) => warn!(error = %e, "Failed to propagate renames to sessions"),
        }

        let deadline = Instant::now() + self.endpoints.timeout;

        let mut calls = Vec::with_capacity(renames.len() + 1);
        calls.push(self.bounded(
            GROUP_TARGET.to_string(),
            self.post(&self.endpoints.group_rename_url, json!({ "vms": renames })),
            deadline,
            cancel,
        ));
        for rename in renames {
            calls.push(self.bounded(
                format!("{IDENTITY_TARGET}:{}", rename.old_name),
                self.post(
                    &self.endpoints.identity_rename_url,
                    json!({ "name": rename.old_name, "new_name": rename.new_name }),
                ),
                deadline,
                cancel,
            ));
        }

        report.calls = join_all(calls).await;

        for call in &report.calls {
            match &call.status {
                CallStatus::Delivered => info!(endpoint = %call.target, "Rename notification delivered"),
                CallStatus::Rejected(status) => {
                    warn!(endpoint = %call.target, status, "Rename notification rejected")
                }
                CallStatus::Failed(error) => {
                    warn!(endpoint = %call.target, error = %error, "Rename notification failed")
                }
                CallStatus::TimedOut => warn!(endpoint = %call.target, "Rename notification timed out"),
            }
        }

        report
    }

    async fn post(&self, url: &str, body: Value) -> Result<(), NotificationError> {
        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }
        Ok(())
    }

    async fn bounded<F>(
        &self,
        target: String,
        call: F,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> CallOutcome
    where
        F: std::future::Future<Output = Result<(), NotificationError>>,
    {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => CallStatus::Failed("cancelled".to_string()),
            result = tokio::time::timeout_at(deadline, call) => match result {
                Ok(Ok(())) => CallStatus::Delivered,
                Ok(Err(NotificationError::Rejected(status))) => CallStatus::Rejected(status),
                Ok(Err(e)) => CallStatus::Failed(e.to_string()),
                Err(_) => CallStatus::TimedOut,
            },
        };

        CallOutcome { target, status }
    }
}
