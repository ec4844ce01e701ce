//! Persists probe and request outcomes through the circuit breaker.
//!
//! Every health-state write in the gateway funnels through `HealthReporter`
//! so breaker transitions, counters and trip notifications stay in step.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use meshgate_metrics::GatewayMetrics;
use meshgate_registry::{RegistryResult, ReplicaRecord, ReplicaRegistry};
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, Transition};
use crate::probe::ProbeOutcome;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked once per Closed → Open transition with the service
/// name and the replica as it was when it tripped.
///
/// The lifecycle manager uses this to evict the replica.
pub type TripCallback = Arc<dyn Fn(String, ReplicaRecord) -> BoxFuture + Send + Sync>;

const DEFAULT_LOAD_ALERT_THRESHOLD: f64 = 10.0;

#[derive(Clone)]
pub struct HealthReporter {
    registry: ReplicaRegistry,
    breaker: CircuitBreaker,
    metrics: GatewayMetrics,
    on_trip: Option<TripCallback>,
    load_alert_threshold: f64,
}

impl HealthReporter {
    pub fn new(registry: ReplicaRegistry, breaker: CircuitBreaker, metrics: GatewayMetrics) -> Self {
        Self {
            registry,
            breaker,
            metrics,
            on_trip: None,
            load_alert_threshold: DEFAULT_LOAD_ALERT_THRESHOLD,
        }
    }

    /// Set a callback for breaker trips.
    pub fn with_trip_callback(mut self, callback: TripCallback) -> Self {
        self.on_trip = Some(callback);
        self
    }

    pub fn with_load_alert_threshold(mut self, threshold: f64) -> Self {
        self.load_alert_threshold = threshold;
        self
    }

    pub fn registry(&self) -> &ReplicaRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Apply a probe outcome to one replica.
    ///
    /// The trip callback is spawned rather than awaited, so this must run
    /// inside a tokio runtime when a callback is installed.
    pub fn record_probe(
        &self,
        service: &str,
        address: &str,
        outcome: &ProbeOutcome,
    ) -> RegistryResult<Transition> {
        let now = Instant::now();
        let (transition, tripped) = self.registry.mutate(service, address, |record| {
            let transition = self.breaker.apply(record, outcome, now);
            let tripped = (transition == Transition::Tripped).then(|| record.clone());
            (transition, tripped)
        })?;

        if outcome.ok && outcome.load >= self.load_alert_threshold {
            warn!(
                %service,
                %address,
                load = outcome.load,
                threshold = self.load_alert_threshold,
                "replica load above threshold"
            );
        }

        self.finish(service, address, outcome.ok, transition, tripped);
        Ok(transition)
    }

    /// Apply the outcome of a proxied request to one replica.
    ///
    /// Requests carry no load figure; a success keeps the last probed load
    /// unless the replica was marked unavailable.
    pub fn report_request(&self, service: &str, address: &str, ok: bool) -> RegistryResult<Transition> {
        let now = Instant::now();
        let (transition, tripped) = self.registry.mutate(service, address, |record| {
            let transition = if ok {
                let load = if record.current_load.is_finite() {
                    record.current_load
                } else {
                    0.0
                };
                self.breaker.record_success(record, load, now)
            } else {
                self.breaker.record_failure(record, now)
            };
            let tripped = (transition == Transition::Tripped).then(|| record.clone());
            (transition, tripped)
        })?;

        self.finish(service, address, ok, transition, tripped);
        Ok(transition)
    }

    /// Run the passive reset over every Open replica.
    ///
    /// Returns the `(service, address)` pairs that were closed.
    pub fn sweep(&self, now: Instant) -> Vec<(String, String)> {
        let mut reset = Vec::new();
        for service in self.registry.snapshot() {
            for replica in service.replicas.iter().filter(|r| r.is_open()) {
                // The replica may have been evicted since the snapshot.
                let transition = self
                    .registry
                    .mutate(&service.name, &replica.address, |record| {
                        self.breaker.refresh(record, now)
                    })
                    .unwrap_or(Transition::None);
                if transition == Transition::Reset {
                    reset.push((service.name.clone(), replica.address.clone()));
                }
            }
        }
        if !reset.is_empty() {
            debug!(count = reset.len(), "breaker sweep reset replicas");
        }
        reset
    }

    fn finish(
        &self,
        service: &str,
        address: &str,
        ok: bool,
        transition: Transition,
        tripped: Option<ReplicaRecord>,
    ) {
        if !ok {
            self.metrics.record_failure(service, address);
        }
        if transition != Transition::Tripped {
            return;
        }
        self.metrics.record_trip(service, address);

        if let (Some(cb), Some(record)) = (&self.on_trip, tripped) {
            let fut = cb(service.to_string(), record);
            tokio::spawn(fut);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use meshgate_registry::{BreakerState, DiscoveredReplica};

    use super::*;
    use crate::breaker::CircuitBreakerConfig;

    fn setup() -> HealthReporter {
        let registry = ReplicaRegistry::new();
        registry.upsert_replicas(
            "api",
            &[
                DiscoveredReplica::new("a:1", "ctr-a"),
                DiscoveredReplica::new("b:1", "ctr-b"),
            ],
        );
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cooling_period: Duration::from_millis(50),
        });
        HealthReporter::new(registry, breaker, GatewayMetrics::new())
    }

    fn failed() -> ProbeOutcome {
        ProbeOutcome::failed(Duration::ZERO)
    }

    #[tokio::test]
    async fn probe_failures_trip_and_count() {
        let reporter = setup();
        assert_eq!(reporter.record_probe("api", "a:1", &failed()).unwrap(), Transition::None);
        assert_eq!(
            reporter.record_probe("api", "a:1", &failed()).unwrap(),
            Transition::Tripped
        );

        let replicas = reporter.registry().list_replicas("api").unwrap();
        assert_eq!(replicas[0].breaker_state, BreakerState::Open);
        assert_eq!(replicas[1].breaker_state, BreakerState::Closed);

        let snap = reporter.metrics().snapshot();
        assert_eq!(snap.replicas[0].failures, 2);
        assert_eq!(snap.replicas[0].trips, 1);
    }

    #[tokio::test]
    async fn trip_callback_fires_once_per_trip() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let callback: TripCallback = Arc::new(move |service: String, record: ReplicaRecord| -> BoxFuture {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push((service, record.container_ref));
            })
        });
        let reporter = setup().with_trip_callback(callback);

        for _ in 0..5 {
            reporter.record_probe("api", "b:1", &failed()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("api".to_string(), "ctr-b".to_string())]);
    }

    #[tokio::test]
    async fn request_outcomes_use_the_same_breaker() {
        let reporter = setup();
        reporter.report_request("api", "a:1", false).unwrap();
        reporter.report_request("api", "a:1", true).unwrap();
        reporter.report_request("api", "a:1", false).unwrap();

        let replica = &reporter.registry().list_replicas("api").unwrap()[0];
        assert_eq!(replica.consecutive_failures, 1);
        assert!(!replica.is_open());
    }

    #[tokio::test]
    async fn request_success_restores_finite_load() {
        let reporter = setup();
        reporter.report_request("api", "a:1", false).unwrap();
        reporter.report_request("api", "a:1", true).unwrap();
        let replica = &reporter.registry().list_replicas("api").unwrap()[0];
        assert_eq!(replica.current_load, 0.0);
    }

    #[tokio::test]
    async fn unknown_replica_is_an_error() {
        let reporter = setup();
        assert!(reporter.record_probe("api", "z:1", &failed()).is_err());
        assert!(reporter.report_request("web", "a:1", true).is_err());
    }

    #[tokio::test]
    async fn sweep_resets_only_cooled_replicas() {
        let reporter = setup();
        reporter.record_probe("api", "a:1", &failed()).unwrap();
        reporter.record_probe("api", "a:1", &failed()).unwrap();

        assert!(reporter.sweep(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_millis(100);
        let reset = reporter.sweep(later);
        assert_eq!(reset, vec![("api".to_string(), "a:1".to_string())]);
        assert!(!reporter.registry().list_replicas("api").unwrap()[0].is_open());
    }
}
