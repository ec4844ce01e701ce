//! Health monitor: background loop that probes every known replica and
//! sweeps Open breakers.
//!
//! Two timers drive it: the liveness tick (default 30s) probes all
//! replicas of all services in parallel, and the sweep (default 5s)
//! applies the passive reset so idle replicas still recover.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::breaker::Transition;
use crate::probe::HealthProbe;
use crate::reporter::HealthReporter;

/// Counts from one liveness tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub probed: usize,
    pub failed: usize,
    pub tripped: usize,
}

pub struct HealthMonitor {
    reporter: HealthReporter,
    probe: HealthProbe,
    interval: Duration,
    sweep_interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        reporter: HealthReporter,
        probe: HealthProbe,
        interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            reporter,
            probe,
            interval,
            sweep_interval,
        }
    }

    /// Probe every replica of every service once.
    pub async fn tick(&self) -> TickStats {
        let services = self.reporter.registry().snapshot();

        let rounds = services.iter().map(|service| async move {
            let addresses: Vec<String> =
                service.replicas.iter().map(|r| r.address.clone()).collect();
            let outcomes = self.probe.probe_all(&addresses, &service.probe_path).await;
            (service.name.as_str(), outcomes)
        });

        let mut stats = TickStats::default();
        for (service, outcomes) in join_all(rounds).await {
            for (address, outcome) in outcomes {
                stats.probed += 1;
                if !outcome.ok {
                    stats.failed += 1;
                }
                match self.reporter.record_probe(service, &address, &outcome) {
                    Ok(Transition::Tripped) => stats.tripped += 1,
                    Ok(_) => {}
                    // Removed by discovery or eviction while the probe ran.
                    Err(e) => debug!(%service, %address, error = %e, "dropping probe result"),
                }
            }
        }
        stats
    }

    /// Close every Open replica whose cooling period has passed.
    pub fn sweep(&self) -> Vec<(String, String)> {
        self.reporter.sweep(Instant::now())
    }

    /// Run both loops until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut liveness = tokio::time::interval(self.interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = ?self.interval,
            sweep_interval = ?self.sweep_interval,
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = liveness.tick() => {
                    let stats = self.tick().await;
                    debug!(
                        probed = stats.probed,
                        failed = stats.failed,
                        tripped = stats.tripped,
                        "health tick complete"
                    );
                }
                _ = sweep.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    debug!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}
