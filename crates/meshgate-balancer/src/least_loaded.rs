//! Least-loaded selection backed by a fresh probe round.
//!
//! Every replica of the service is probed in parallel and the outcomes are
//! recorded through the breaker before choosing, so the load figures are
//! at most one probe round-trip old. A replica that fails or times out
//! reports `+Inf` and is never chosen.

use std::time::Instant;

use meshgate_health::{HealthProbe, HealthReporter};
use meshgate_registry::ReplicaRecord;
use tracing::debug;

use crate::error::{BalancerError, BalancerResult};
use crate::policy::{SelectFuture, SelectionPolicy};

pub struct LeastLoaded {
    reporter: HealthReporter,
    probe: HealthProbe,
}

impl LeastLoaded {
    pub fn new(reporter: HealthReporter, probe: HealthProbe) -> Self {
        Self { reporter, probe }
    }

    pub async fn pick(&self, service: &str) -> BalancerResult<ReplicaRecord> {
        let registry = self.reporter.registry();
        let definition = registry.get(service)?;
        let addresses: Vec<String> = definition
            .replicas
            .iter()
            .map(|r| r.address.clone())
            .collect();

        for (address, outcome) in self.probe.probe_all(&addresses, &definition.probe_path).await {
            if let Err(e) = self.reporter.record_probe(service, &address, &outcome) {
                debug!(%service, %address, error = %e, "replica gone before probe was recorded");
            }
        }

        let now = Instant::now();
        let breaker = self.reporter.breaker();
        let mut best: Option<ReplicaRecord> = None;
        for address in &addresses {
            let candidate = registry
                .mutate(service, address, |record| {
                    (breaker.is_eligible(record, now) && record.current_load.is_finite())
                        .then(|| record.clone())
                })
                .ok()
                .flatten();

            // Strictly lower wins, so ties go to registration order.
            if let Some(c) = candidate {
                if best.as_ref().is_none_or(|b| c.current_load < b.current_load) {
                    best = Some(c);
                }
            }
        }

        match best {
            Some(record) => {
                debug!(%service, address = %record.address, load = record.current_load, "least loaded selected");
                Ok(record)
            }
            None => Err(BalancerError::Unavailable(service.to_string())),
        }
    }
}

impl SelectionPolicy for LeastLoaded {
    fn select<'a>(&'a self, service: &'a str) -> SelectFuture<'a> {
        Box::pin(self.pick(service))
    }
}
