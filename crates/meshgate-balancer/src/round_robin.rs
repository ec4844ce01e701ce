//! Round-robin selection that skips Open replicas.
//!
//! Each service has its own cursor behind its own lock, held for the whole
//! scan so two concurrent requests never claim the same slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use meshgate_health::CircuitBreaker;
use meshgate_registry::{ReplicaRecord, ReplicaRegistry};
use tracing::debug;

use crate::error::{BalancerError, BalancerResult};
use crate::policy::{SelectFuture, SelectionPolicy};

pub struct RoundRobin {
    registry: ReplicaRegistry,
    breaker: CircuitBreaker,
    /// service → index of the next replica to try.
    cursors: Mutex<HashMap<String, Arc<Mutex<usize>>>>,
}

impl RoundRobin {
    pub fn new(registry: ReplicaRegistry, breaker: CircuitBreaker) -> Self {
        Self {
            registry,
            breaker,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Select the next eligible replica after the service's cursor.
    pub fn next(&self, service: &str) -> BalancerResult<ReplicaRecord> {
        let replicas = self.registry.list_replicas(service)?;
        let cursor = self.cursor(service);
        let mut cursor = cursor.lock().unwrap_or_else(PoisonError::into_inner);

        let count = replicas.len();
        let now = Instant::now();
        for offset in 0..count {
            let idx = (*cursor + offset) % count;
            let address = &replicas[idx].address;
            let picked = self
                .registry
                .mutate(service, address, |record| {
                    self.breaker
                        .is_eligible(record, now)
                        .then(|| record.clone())
                })
                .ok()
                .flatten();

            if let Some(record) = picked {
                *cursor = (idx + 1) % count;
                debug!(%service, address = %record.address, "round robin selected");
                return Ok(record);
            }
        }

        Err(BalancerError::Unavailable(service.to_string()))
    }

    fn cursor(&self, service: &str) -> Arc<Mutex<usize>> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cursors.entry(service.to_string()).or_default())
    }
}

impl SelectionPolicy for RoundRobin {
    fn select<'a>(&'a self, service: &'a str) -> SelectFuture<'a> {
        Box::pin(async move { self.next(service) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use meshgate_health::CircuitBreakerConfig;
    use meshgate_registry::{BreakerState, DiscoveredReplica, RegistryError};

    use super::*;

    fn setup(addrs: &[&str]) -> (ReplicaRegistry, RoundRobin) {
        let registry = ReplicaRegistry::new();
        let discovered: Vec<_> = addrs
            .iter()
            .map(|a| DiscoveredReplica::new(*a, format!("ctr-{a}")))
            .collect();
        registry.upsert_replicas("api", &discovered);
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooling_period: Duration::from_secs(60),
        });
        (registry.clone(), RoundRobin::new(registry, breaker))
    }

    fn open(registry: &ReplicaRegistry, address: &str) {
        registry
            .mutate("api", address, |r| {
                r.breaker_state = BreakerState::Open;
                r.consecutive_failures = 3;
                r.last_failure_at = Some(Instant::now());
            })
            .unwrap();
    }

    fn picks(rr: &RoundRobin, n: usize) -> Vec<String> {
        (0..n).map(|_| rr.next("api").unwrap().address).collect()
    }

    #[test]
    fn cycles_in_registration_order() {
        let (_, rr) = setup(&["A", "B", "C"]);
        assert_eq!(picks(&rr, 5), vec!["A", "B", "C", "A", "B"]);
    }

    #[test]
    fn skips_open_replica() {
        let (registry, rr) = setup(&["A", "B", "C"]);
        open(&registry, "B");
        assert_eq!(picks(&rr, 4), vec!["A", "C", "A", "C"]);
    }

    #[test]
    fn all_open_is_unavailable() {
        let (registry, rr) = setup(&["A", "B"]);
        open(&registry, "A");
        open(&registry, "B");
        assert_eq!(
            rr.next("api").unwrap_err(),
            BalancerError::Unavailable("api".to_string())
        );
    }

    #[test]
    fn empty_service_is_unavailable() {
        let (_, rr) = setup(&[]);
        assert!(matches!(rr.next("api"), Err(BalancerError::Unavailable(_))));
    }

    #[test]
    fn unknown_service_is_registry_error() {
        let (_, rr) = setup(&["A"]);
        assert_eq!(
            rr.next("web").unwrap_err(),
            BalancerError::Registry(RegistryError::ServiceNotFound("web".to_string()))
        );
    }

    #[test]
    fn cooled_replica_rejoins_rotation() {
        let (registry, _) = setup(&["A", "B"]);
        let rr = RoundRobin::new(
            registry.clone(),
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 3,
                cooling_period: Duration::from_millis(10),
            }),
        );
        open(&registry, "B");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(picks(&rr, 2), vec!["A", "B"]);
        assert!(!registry.list_replicas("api").unwrap()[1].is_open());
    }

    #[test]
    fn removed_replica_is_never_selected() {
        let (registry, rr) = setup(&["A", "B", "C"]);
        registry.upsert_replicas(
            "api",
            &[DiscoveredReplica::new("A", "ctr-A"), DiscoveredReplica::new("C", "ctr-C")],
        );
        assert!(picks(&rr, 6).iter().all(|a| a != "B"));
    }

    #[test]
    fn concurrent_selection_spreads_evenly() {
        use std::thread;

        let (_, rr) = setup(&["A", "B", "C", "D"]);
        let rr = Arc::new(rr);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rr = Arc::clone(&rr);
                thread::spawn(move || picks(&rr, 100))
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for h in handles {
            for a in h.join().unwrap() {
                *counts.entry(a).or_default() += 1;
            }
        }
        // Serialized cursor: 400 picks over 4 replicas land exactly evenly.
        assert!(counts.values().all(|&c| c == 100), "{counts:?}");
    }
}
