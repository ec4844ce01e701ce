//! Error types for the replica registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("replica {address} not found in service {service}")]
    ReplicaNotFound { service: String, address: String },
}
