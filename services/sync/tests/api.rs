//! HTTP API integration tests.
//!
//! Serves the router on an ephemeral port, with the scheduler worker running
//! against in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use vmsync_inventory::{LiveVm, PowerState, VmUuid};
use vmsync_sync::{
    api,
    cache::MemorySessionCache,
    config::{EndpointConfig, HypervisorConfig, Secret, SyncSettings},
    db::MemoryRecordStore,
    engine::ReconciliationEngine,
    notify::Dispatcher,
    propagator::Propagator,
    provider::StaticInventory,
    scheduler::{SchedulerWorker, SyncCoordinator, SyncState},
    state::AppState,
};

struct ApiHarness {
    base_url: String,
    client: reqwest::Client,
    inventory: Arc<StaticInventory>,
    store: Arc<MemoryRecordStore>,
    sync: Arc<SyncState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ApiHarness {
    async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,vmsync_sync=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let inventory = Arc::new(StaticInventory::new());
        let store = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(MemorySessionCache::new());
        let propagator = Arc::new(Propagator::new(cache));
        let endpoints = EndpointConfig {
            group_rename_url: "http://127.0.0.1:1/groups".to_string(),
            identity_rename_url: "http://127.0.0.1:1/identity".to_string(),
            timeout: Duration::from_secs(1),
        };
        let hosts = ["esxi-1", "esxi-2"]
            .iter()
            .map(|name| HypervisorConfig {
                host: name.to_string(),
                port: 443,
                username: "root".to_string(),
                password: Secret::new("pw"),
                inventory_url: format!("http://{name}/inventory"),
            })
            .collect();

        let coordinator = Arc::new(SyncCoordinator::new(
            hosts,
            ReconciliationEngine::new(inventory.clone(), store.clone()),
            propagator.clone(),
            Dispatcher::new(endpoints, propagator).unwrap(),
        ));
        let sync = Arc::new(SyncState::new());
        let settings = SyncSettings {
            interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
            host_timeout: Duration::from_secs(10),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = SchedulerWorker::new(coordinator.clone(), sync.clone(), settings);
        tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { worker.run(shutdown_rx).await }
        });

        let app = api::create_router(AppState::new(sync.clone(), coordinator, settings.timeout));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_rx;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            inventory,
            store,
            sync,
            shutdown_tx,
        }
    }

    async fn get(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> Value {
        self.client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

impl Drop for ApiHarness {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn vm(uuid: &str, name: &str) -> LiveVm {
    LiveVm {
        name: name.to_string(),
        hostname: None,
        address: None,
        uuid: Some(VmUuid::parse(uuid).unwrap()),
        power_state: PowerState::On,
        tools_status: String::new(),
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = ApiHarness::new().await;

    let health = h.get("/healthz").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "vm-sync");

    let live = h
        .client
        .get(format!("{}/livez", h.base_url))
        .send()
        .await
        .unwrap();
    assert!(live.status().is_success());
}

#[tokio::test]
async fn test_status_reflects_single_flight() {
    let h = ApiHarness::new().await;

    let idle = h.get("/sync/status").await;
    assert_eq!(idle["ok"], true);
    assert_eq!(idle["data"]["sync_in_process"], false);

    let _guard = h.sync.try_begin().unwrap();
    let busy = h.get("/sync/status").await;
    assert_eq!(busy["data"]["sync_in_process"], true);
}

#[tokio::test]
async fn test_sync_now_runs_a_cycle() {
    let h = ApiHarness::new().await;
    h.inventory.set_vms("esxi-1", vec![vm("u1", "vm1")]).await;

    let response = h.get("/sync/now").await;
    assert_eq!(response, json!({ "ok": true, "message": "sync triggered" }));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.inventory.calls() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "cycle did not run");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.store.records().await.len(), 1);
}

#[tokio::test]
async fn test_sync_now_while_busy_is_queued() {
    let h = ApiHarness::new().await;
    let guard = h.sync.try_begin().unwrap();

    let response = h.get("/sync/now").await;
    assert_eq!(response["ok"], true);
    assert_eq!(response["message"], "sync already in progress, queued");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.inventory.calls(), 0);

    drop(guard);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.inventory.calls() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "queued cycle did not run"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_sync_vms_per_host_results() {
    let h = ApiHarness::new().await;
    h.inventory
        .set_vms("esxi-1", vec![vm("u1", "vm1"), vm("u2", "vm2")])
        .await;
    h.inventory.set_vms("esxi-2", vec![vm("u3", "vm3")]).await;

    let response = h.post("/sync/vms", json!({ "vms": ["vm1", "u3"] })).await;

    assert_eq!(response["ok"], true);
    let data = response["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["esxi-1"]["matched"], 1);
    assert_eq!(data[0]["esxi-1"]["added"], 1);
    assert_eq!(data[1]["esxi-2"]["added"], 1);
    assert_eq!(h.store.records().await.len(), 2);
    assert!(!h.sync.in_progress());
}

#[tokio::test]
async fn test_sync_vms_rejected_while_syncing() {
    let h = ApiHarness::new().await;
    let _guard = h.sync.try_begin().unwrap();

    let response = h.post("/sync/vms", json!({ "vms": ["vm1"] })).await;

    assert_eq!(response, json!({ "ok": false, "message": "already syncing" }));
    assert_eq!(h.inventory.calls(), 0);
}

#[tokio::test]
async fn test_sync_vms_requires_identifiers() {
    let h = ApiHarness::new().await;

    let response = h.post("/sync/vms", json!({ "vms": ["", "  "] })).await;

    assert_eq!(response["ok"], false);
    assert_eq!(response["message"], "no vms given");
}
