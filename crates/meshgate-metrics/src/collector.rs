//! Gateway metrics collector.
//!
//! Counters are atomics; the per-replica map is only write-locked the
//! first time a replica reports and when it leaves the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Default)]
struct ReplicaMetrics {
    failures: AtomicU64,
    trips: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    /// (service, address) → counters.
    replicas: RwLock<HashMap<(String, String), Arc<ReplicaMetrics>>>,
    evictions: AtomicU64,
    termination_failures: AtomicU64,
    sagas_completed: AtomicU64,
    sagas_failed: AtomicU64,
    compensation_failures: AtomicU64,
}

/// Counter values for one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaCounters {
    pub service: String,
    pub address: String,
    pub failures: u64,
    pub trips: u64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Sorted by (service, address).
    pub replicas: Vec<ReplicaCounters>,
    pub evictions: u64,
    pub termination_failures: u64,
    pub sagas_completed: u64,
    pub sagas_failed: u64,
    pub compensation_failures: u64,
}

/// Shared handle to the gateway's counters. `Clone` shares state.
#[derive(Debug, Clone, Default)]
pub struct GatewayMetrics {
    inner: Arc<Inner>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed probe or request against a replica.
    pub fn record_failure(&self, service: &str, address: &str) {
        self.replica(service, address)
            .failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count a Closed → Open transition.
    pub fn record_trip(&self, service: &str, address: &str) {
        self.replica(service, address)
            .trips
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count an eviction; `terminated` is false when teardown failed.
    pub fn record_eviction(&self, terminated: bool) {
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
        if !terminated {
            self.inner
                .termination_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a finished saga and the compensations that failed within it.
    pub fn record_saga(&self, completed: bool, compensation_failures: u64) {
        let counter = if completed {
            &self.inner.sagas_completed
        } else {
            &self.inner.sagas_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .compensation_failures
            .fetch_add(compensation_failures, Ordering::Relaxed);
    }

    /// Drop the counters of a replica that left the registry.
    pub fn forget_replica(&self, service: &str, address: &str) {
        let removed = self
            .inner
            .replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(service.to_string(), address.to_string()))
            .is_some();
        if removed {
            debug!(%service, %address, "dropped replica metrics");
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut replicas: Vec<ReplicaCounters> = self
            .inner
            .replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((service, address), m)| ReplicaCounters {
                service: service.clone(),
                address: address.clone(),
                failures: m.failures.load(Ordering::Relaxed),
                trips: m.trips.load(Ordering::Relaxed),
            })
            .collect();
        replicas.sort_by(|a, b| (&a.service, &a.address).cmp(&(&b.service, &b.address)));

        MetricsSnapshot {
            replicas,
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            termination_failures: self.inner.termination_failures.load(Ordering::Relaxed),
            sagas_completed: self.inner.sagas_completed.load(Ordering::Relaxed),
            sagas_failed: self.inner.sagas_failed.load(Ordering::Relaxed),
            compensation_failures: self.inner.compensation_failures.load(Ordering::Relaxed),
        }
    }

    fn replica(&self, service: &str, address: &str) -> Arc<ReplicaMetrics> {
        let key = (service.to_string(), address.to_string());
        if let Some(m) = self
            .inner
            .replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(m);
        }

        let mut replicas = self
            .inner
            .replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(replicas.entry(key).or_insert_with(|| {
            debug!(%service, %address, "tracking replica metrics");
            Arc::new(ReplicaMetrics::default())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_failures_and_trips_per_replica() {
        let metrics = GatewayMetrics::new();
        metrics.record_failure("api", "b:1");
        metrics.record_failure("api", "a:1");
        metrics.record_failure("api", "a:1");
        metrics.record_trip("api", "a:1");

        let snap = metrics.snapshot();
        assert_eq!(snap.replicas.len(), 2);
        assert_eq!(snap.replicas[0].address, "a:1");
        assert_eq!(snap.replicas[0].failures, 2);
        assert_eq!(snap.replicas[0].trips, 1);
        assert_eq!(snap.replicas[1].failures, 1);
        assert_eq!(snap.replicas[1].trips, 0);
    }

    #[test]
    fn forgotten_replicas_leave_the_snapshot() {
        let metrics = GatewayMetrics::new();
        metrics.record_failure("api", "a:1");
        metrics.record_trip("api", "b:1");

        metrics.forget_replica("api", "a:1");
        metrics.forget_replica("api", "z:1");

        let snap = metrics.snapshot();
        assert_eq!(snap.replicas.len(), 1);
        assert_eq!(snap.replicas[0].address, "b:1");

        // A replica that comes back starts from zero.
        metrics.record_failure("api", "a:1");
        assert_eq!(metrics.snapshot().replicas[0].failures, 1);
    }

    #[test]
    fn counts_evictions_and_termination_failures() {
        let metrics = GatewayMetrics::new();
        metrics.record_eviction(true);
        metrics.record_eviction(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.evictions, 2);
        assert_eq!(snap.termination_failures, 1);
    }

    #[test]
    fn counts_saga_outcomes() {
        let metrics = GatewayMetrics::new();
        metrics.record_saga(true, 0);
        metrics.record_saga(false, 2);
        metrics.record_saga(false, 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.sagas_completed, 1);
        assert_eq!(snap.sagas_failed, 2);
        assert_eq!(snap.compensation_failures, 2);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = GatewayMetrics::new();
        let other = metrics.clone();
        other.record_trip("api", "a:1");
        assert_eq!(metrics.snapshot().replicas[0].trips, 1);
    }

    #[test]
    fn concurrent_recording() {
        use std::thread;

        let metrics = GatewayMetrics::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_failure("api", "a:1");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().replicas[0].failures, 400);
    }
}
