//! Balancer error types.

use meshgate_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BalancerError {
    /// Every replica is Open, or the service has none.
    #[error("no eligible replica for service: {0}")]
    Unavailable(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type BalancerResult<T> = Result<T, BalancerError>;
