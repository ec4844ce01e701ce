//! Per-replica circuit breaker.
//!
//! The breaker is stateless logic over a `ReplicaRecord`; callers run it
//! inside `ReplicaRegistry::mutate` so the failure count, state and
//! timestamp change together under the replica's lock.

use std::time::{Duration, Instant};

use meshgate_registry::{BreakerState, ReplicaRecord};
use tracing::{info, warn};

use crate::probe::ProbeOutcome;

/// Breaker thresholds, process-wide and immutable after load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures needed to trip.
    pub failure_threshold: u32,
    /// Time after the last failure before an Open replica resets.
    pub cooling_period: Duration,
}

impl CircuitBreakerConfig {
    /// Cooling period of 3.5 × the request timeout.
    pub fn from_request_timeout(failure_threshold: u32, request_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            cooling_period: request_timeout.mul_f64(3.5),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_request_timeout(3, Duration::from_secs(5))
    }
}

/// State change caused by one breaker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Closed → Open. Reported once per trip.
    Tripped,
    /// Open → Closed after the cooling period.
    Reset,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Passive reset: close an Open replica whose cooling period is over.
    pub fn refresh(&self, record: &mut ReplicaRecord, now: Instant) -> Transition {
        if !record.is_open() {
            return Transition::None;
        }
        let cooled = record
            .last_failure_at
            .is_none_or(|at| now.saturating_duration_since(at) > self.config.cooling_period);
        if !cooled {
            return Transition::None;
        }

        record.breaker_state = BreakerState::Closed;
        record.consecutive_failures = 0;
        record.last_failure_at = None;
        info!(address = %record.address, "circuit breaker reset");
        Transition::Reset
    }

    /// Count one failed probe or request.
    ///
    /// Failures while Open extend the cooling window but never re-trip.
    pub fn record_failure(&self, record: &mut ReplicaRecord, now: Instant) -> Transition {
        self.refresh(record, now);

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure_at = Some(now);
        record.current_load = f64::INFINITY;

        if record.is_open() || record.consecutive_failures < self.config.failure_threshold {
            return Transition::None;
        }

        record.breaker_state = BreakerState::Open;
        warn!(
            address = %record.address,
            failures = record.consecutive_failures,
            threshold = self.config.failure_threshold,
            cooling_period = ?self.config.cooling_period,
            "circuit breaker tripped"
        );
        Transition::Tripped
    }

    /// Count one successful probe or request reporting `load`.
    ///
    /// A success clears the failure streak only while Closed; an Open
    /// replica waits out its cooling period regardless.
    pub fn record_success(&self, record: &mut ReplicaRecord, load: f64, now: Instant) -> Transition {
        let transition = self.refresh(record, now);
        record.current_load = load;
        if !record.is_open() {
            record.consecutive_failures = 0;
        }
        transition
    }

    pub fn apply(&self, record: &mut ReplicaRecord, outcome: &ProbeOutcome, now: Instant) -> Transition {
        if outcome.ok {
            self.record_success(record, outcome.load, now)
        } else {
            self.record_failure(record, now)
        }
    }

    /// Whether the replica may be selected, resetting it first if it has cooled.
    pub fn is_eligible(&self, record: &mut ReplicaRecord, now: Instant) -> bool {
        self.refresh(record, now);
        !record.is_open()
    }
}
