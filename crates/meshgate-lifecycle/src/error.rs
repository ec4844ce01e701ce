//! Collaborator error types.

use thiserror::Error;

/// Tearing down a replica's compute unit failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TerminationError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("terminating {container_ref} exited with status {code}")]
    Exit { container_ref: String, code: i32 },

    #[error("terminating {container_ref} was killed by a signal")]
    Signal { container_ref: String },
}

/// Listing a service's live replicas failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no discovery source for service: {0}")]
    UnknownService(String),

    #[error("resolving {host} failed: {reason}")]
    Resolve { host: String, reason: String },
}
