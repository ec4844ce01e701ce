//! LoadBalancer: the per-request entry point used by the proxy layer.

use meshgate_health::{HealthProbe, HealthReporter};
use meshgate_registry::ReplicaRecord;
use tracing::{debug, warn};

use crate::error::{BalancerError, BalancerResult};
use crate::least_loaded::LeastLoaded;
use crate::policy::{Policy, SelectionPolicy};
use crate::round_robin::RoundRobin;

pub struct LoadBalancer {
    reporter: HealthReporter,
    round_robin: RoundRobin,
    least_loaded: LeastLoaded,
    default_policy: Policy,
}

impl LoadBalancer {
    pub fn new(reporter: HealthReporter, probe: HealthProbe) -> Self {
        Self {
            round_robin: RoundRobin::new(reporter.registry().clone(), *reporter.breaker()),
            least_loaded: LeastLoaded::new(reporter.clone(), probe),
            reporter,
            default_policy: Policy::default(),
        }
    }

    pub fn with_default_policy(mut self, policy: Policy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn default_policy(&self) -> Policy {
        self.default_policy
    }

    /// Select a replica of `service` under `policy`, or the default policy.
    pub async fn select(&self, service: &str, policy: Option<Policy>) -> BalancerResult<ReplicaRecord> {
        let policy = policy.unwrap_or(self.default_policy);
        let result = self.policy(policy).select(service).await;
        if let Err(BalancerError::Unavailable(_)) = &result {
            warn!(%service, %policy, "no eligible replica");
        }
        result
    }

    /// Feed the outcome of a call made to a selected replica back into its
    /// breaker.
    pub fn report(&self, service: &str, address: &str, ok: bool) {
        if let Err(e) = self.reporter.report_request(service, address, ok) {
            debug!(%service, %address, error = %e, "outcome for a replica no longer registered");
        }
    }

    fn policy(&self, policy: Policy) -> &dyn SelectionPolicy {
        match policy {
            Policy::RoundRobin => &self.round_robin,
            Policy::LeastLoaded => &self.least_loaded,
        }
    }
}
