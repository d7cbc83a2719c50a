//! Sync status and trigger endpoints.
//!
//! - `GET  /sync/status`: whether a sync is running
//! - `GET  /sync/now`: request a full cycle
//! - `POST /sync/vms`: sync selected VMs immediately

use std::collections::{BTreeMap, BTreeSet};

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vmsync_inventory::SelectiveSyncResult;

use crate::state::AppState;

/// Envelope shared by every sync endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn success(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncStatusData {
    pub sync_in_process: bool,
}

/// Body of `POST /sync/vms`: VM UUIDs or names.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncVmsRequest {
    pub vms: Vec<String>,
}

/// Per-host results, one single-entry map per host.
type HostResults = Vec<BTreeMap<String, SelectiveSyncResult>>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/now", get(sync_now))
        .route("/vms", post(sync_vms))
}

async fn status(State(state): State<AppState>) -> Json<ApiResponse<SyncStatusData>> {
    Json(ApiResponse::success(
        "Sync status checked successfully",
        Some(SyncStatusData {
            sync_in_process: state.sync().in_progress(),
        }),
    ))
}

/// Triggers made while a cycle runs are queued as one follow-up cycle.
async fn sync_now(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    let busy = state.sync().in_progress();
    state.sync().trigger();

    let message = if busy {
        "sync already in progress, queued"
    } else {
        "sync triggered"
    };
    info!(busy, "Manual sync requested");
    Json(ApiResponse::success(message, None))
}

async fn sync_vms(
    State(state): State<AppState>,
    Json(request): Json<SyncVmsRequest>,
) -> Json<ApiResponse<HostResults>> {
    let selectors: BTreeSet<String> = request
        .vms
        .into_iter()
        .map(|vm| vm.trim().to_string())
        .filter(|vm| !vm.is_empty())
        .collect();
    if selectors.is_empty() {
        return Json(ApiResponse::failure("no vms given"));
    }

    let Some(_guard) = state.sync().try_begin() else {
        return Json(ApiResponse::failure("already syncing"));
    };

    let cancel = CancellationToken::new();
    let work = state.coordinator().sync_selected(&selectors, &cancel);
    match tokio::time::timeout(state.sync_timeout(), work).await {
        Ok(Ok(results)) => {
            let data = results
                .into_iter()
                .map(|result| BTreeMap::from([(result.host.clone(), result)]))
                .collect();
            Json(ApiResponse::success("sync completed", Some(data)))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Selective sync failed");
            Json(ApiResponse::failure(e.to_string()))
        }
        Err(_) => {
            warn!(
                timeout_secs = state.sync_timeout().as_secs(),
                "Selective sync timed out"
            );
            Json(ApiResponse::failure("sync timed out"))
        }
    }
}
