//! ReplicaLifecycleManager: evicts tripped replicas and reconciles
//! discovery results into the registry.

use std::sync::Arc;
use std::time::Duration;

use meshgate_health::{BoxFuture, TripCallback};
use meshgate_metrics::GatewayMetrics;
use meshgate_registry::{ReplicaRecord, ReplicaRegistry, UpsertStats};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::discovery::Discovery;
use crate::error::DiscoveryError;
use crate::terminator::Terminator;

pub struct ReplicaLifecycleManager {
    registry: ReplicaRegistry,
    discovery: Arc<dyn Discovery>,
    terminator: Arc<dyn Terminator>,
    metrics: GatewayMetrics,
    /// Services reconciled on each discovery tick.
    services: Vec<String>,
}

impl ReplicaLifecycleManager {
    pub fn new(
        registry: ReplicaRegistry,
        discovery: Arc<dyn Discovery>,
        terminator: Arc<dyn Terminator>,
        metrics: GatewayMetrics,
        services: Vec<String>,
    ) -> Self {
        Self {
            registry,
            discovery,
            terminator,
            metrics,
            services,
        }
    }

    /// Evict a tripped replica.
    ///
    /// Terminates the compute unit first, then removes the registry entry
    /// whether or not termination succeeded. Returns false if the replica
    /// was already gone or another eviction for it is in flight.
    pub async fn on_breaker_trip(&self, service: &str, replica: &ReplicaRecord) -> bool {
        let address = replica.address.as_str();
        let record = match self.registry.begin_eviction(service, address) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%service, %address, "eviction already in progress");
                return false;
            }
            Err(e) => {
                debug!(%service, %address, error = %e, "tripped replica no longer registered");
                return false;
            }
        };

        info!(%service, %address, container_ref = %record.container_ref, "evicting replica");
        let terminated = match self.terminator.terminate(&record.container_ref).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    %service,
                    %address,
                    container_ref = %record.container_ref,
                    error = %e,
                    "failed to terminate replica, evicting anyway"
                );
                false
            }
        };

        let removed = self
            .registry
            .finish_eviction(service, address)
            .unwrap_or(false);
        self.metrics.record_eviction(terminated);
        self.metrics.forget_replica(service, address);
        info!(%service, %address, terminated, "replica evicted");
        removed
    }

    /// Reconcile one service against its discovered replica set.
    ///
    /// On discovery failure the registry is left untouched.
    pub async fn on_discovery_tick(&self, service: &str) -> Result<UpsertStats, DiscoveryError> {
        let discovered = self.discovery.list_live_replicas(service).await?;
        let stats = self.registry.upsert_replicas(service, &discovered);
        for address in &stats.removed {
            self.metrics.forget_replica(service, address);
        }
        Ok(stats)
    }

    /// Run a discovery tick for every managed service.
    pub async fn discover_all(&self) {
        for service in &self.services {
            match self.on_discovery_tick(service).await {
                Ok(stats) if !stats.is_empty() => {
                    debug!(%service, added = ?stats.added, removed = ?stats.removed, "discovery applied");
                }
                Ok(_) => {}
                Err(e) => warn!(%service, error = %e, "discovery failed, keeping current replicas"),
            }
        }
    }

    /// Adapter for `HealthReporter::with_trip_callback`.
    pub fn trip_callback(self: &Arc<Self>) -> TripCallback {
        let manager = Arc::clone(self);
        Arc::new(move |service: String, replica: ReplicaRecord| -> BoxFuture {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                manager.on_breaker_trip(&service, &replica).await;
            })
        })
    }

    /// Tick discovery every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(services = self.services.len(), ?interval, "discovery loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.discover_all().await,
                _ = shutdown.changed() => {
                    debug!("discovery loop shutting down");
                    break;
                }
            }
        }
    }
}
