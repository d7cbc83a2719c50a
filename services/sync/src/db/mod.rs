//! Record store for VM inventory.
//!
//! This module provides:
//! - The [`RecordStore`] interface the reconciliation engine writes through
//! - Connection pool management for the Postgres backend
//! - An in-memory store for tests and local development
//!
//! The Postgres layer uses SQLx without compile-time query checking.

mod error;
mod memory;
mod records;

pub use error::StoreError;
pub use memory::MemoryRecordStore;
pub use records::PgRecordStore;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use vmsync_inventory::{VmIdentity, VmRecord};

/// Document-style access to VM records, keyed by identity.
///
/// Every call is independent; there are no cross-record transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by UUID or, for UUID-less records, by name.
    async fn get(&self, identity: &VmIdentity) -> Result<Option<VmRecord>, StoreError>;

    /// Insert a new record.
    ///
    /// Fails with [`StoreError::Duplicate`] if the identity is already taken
    /// and [`StoreError::Invalid`] if the record has no identity.
    async fn create(&self, record: &VmRecord) -> Result<(), StoreError>;

    /// Overwrite the record with the same identity.
    async fn update(&self, record: &VmRecord) -> Result<(), StoreError>;

    /// All records owned by a hypervisor host.
    async fn query_by_host(&self, host_address: &str) -> Result<Vec<VmRecord>, StoreError>;
}

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/vmsync".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/sync/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Get a VM record store handle.
    pub fn record_store(&self) -> PgRecordStore {
        PgRecordStore::new(self.pool.clone())
    }
}
