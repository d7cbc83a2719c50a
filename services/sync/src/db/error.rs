//! Record store error types.

use thiserror::Error;
use vmsync_inventory::InventoryError;

/// Record store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/sync.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// The record is not persistable.
    #[error("invalid record: {0}")]
    Invalid(#[from] InventoryError),

    /// A record with the same identity already exists.
    #[error("record already exists: {0}")]
    Duplicate(String),

    /// No record matched the identity of an update.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A stored row could not be turned back into a record.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// The backend refused the operation.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true for per-record rejections, as opposed to backend failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::Invalid(_) | StoreError::Duplicate(_) | StoreError::NotFound(_)
        )
    }
}
