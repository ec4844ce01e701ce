//! Domain types for the replica registry.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Probe path used when a service is first seen through discovery.
pub const DEFAULT_PROBE_PATH: &str = "/status";

// ── Replica ───────────────────────────────────────────────────────

/// Circuit breaker state of a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Eligible for selection.
    Closed,
    /// Excluded from selection until the cooling period has elapsed.
    Open,
}

/// Mutable health and circuit state for one running replica.
///
/// `breaker_state == Open` always comes with `last_failure_at` set, and a
/// failure count at or above the threshold always comes with `Open`. The
/// breaker in `meshgate-health` maintains both under the replica's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaRecord {
    /// `host:port`, unique within a service.
    pub address: String,
    /// Opaque handle to the compute unit, only used for termination.
    pub container_ref: String,
    pub consecutive_failures: u32,
    pub breaker_state: BreakerState,
    pub last_failure_at: Option<Instant>,
    /// Last reported load. `f64::INFINITY` means the replica is unavailable.
    pub current_load: f64,
}

impl ReplicaRecord {
    /// A freshly discovered replica with zeroed health state.
    pub fn new(address: impl Into<String>, container_ref: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            container_ref: container_ref.into(),
            consecutive_failures: 0,
            breaker_state: BreakerState::Closed,
            last_failure_at: None,
            current_load: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.breaker_state == BreakerState::Open
    }

    /// Serializable view, with the failure timestamp rendered relative to `now`.
    pub fn status(&self, now: Instant) -> ReplicaStatus {
        ReplicaStatus {
            address: self.address.clone(),
            container_ref: self.container_ref.clone(),
            breaker_state: self.breaker_state,
            consecutive_failures: self.consecutive_failures,
            current_load: self.current_load.is_finite().then_some(self.current_load),
            last_failure_secs_ago: self
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
        }
    }
}

/// A replica reported live by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredReplica {
    pub address: String,
    pub container_ref: String,
}

impl DiscoveredReplica {
    pub fn new(address: impl Into<String>, container_ref: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            container_ref: container_ref.into(),
        }
    }
}

// ── Service ───────────────────────────────────────────────────────

/// Snapshot of one service and its replicas, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    /// Endpoint queried for health and load.
    pub probe_path: String,
    pub replicas: Vec<ReplicaRecord>,
}

impl ServiceDefinition {
    pub fn status(&self, now: Instant) -> ServiceStatus {
        ServiceStatus {
            name: self.name.clone(),
            probe_path: self.probe_path.clone(),
            replicas: self.replicas.iter().map(|r| r.status(now)).collect(),
        }
    }
}

// ── Introspection views ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub address: String,
    pub container_ref: String,
    pub breaker_state: BreakerState,
    pub consecutive_failures: u32,
    /// `None` when the last probe failed.
    pub current_load: Option<f64>,
    pub last_failure_secs_ago: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub probe_path: String,
    pub replicas: Vec<ReplicaStatus>,
}
