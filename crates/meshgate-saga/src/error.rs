//! Saga step error types.

use meshgate_balancer::BalancerError;
use meshgate_health::TransportError;
use thiserror::Error;

/// Why one step's execute or compensate call failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("no replica to run step on: {0}")]
    Unavailable(#[from] BalancerError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("service rejected step with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The call succeeded, so the resource likely exists, but its id could
    /// not be read. `body` is kept for manual reconciliation.
    #[error("response has no resource id in field `{field}`: {body}")]
    MissingResourceId { field: String, body: String },
}
