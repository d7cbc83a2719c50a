//! Error types for inventory parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating inventory data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The UUID string is empty.
    #[error("VM UUID cannot be empty")]
    EmptyUuid,

    /// The UUID is a provider placeholder rather than a real identifier.
    #[error("VM UUID is a placeholder: '{0}'")]
    PlaceholderUuid(String),

    /// The record has neither a UUID nor a name and cannot be persisted.
    #[error("VM on host '{host_address}' has neither a UUID nor a name")]
    MissingIdentity { host_address: String },
}
