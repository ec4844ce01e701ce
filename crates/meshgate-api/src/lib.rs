//! meshgate-api — REST surface of the gateway core.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/status` | Gateway liveness plus every service's replicas |
//! | GET | `/api/v1/services` | List services with replica state |
//! | GET | `/api/v1/services/{name}` | One service with replica state |
//! | GET | `/api/v1/services/{name}/select` | Pick a replica (`?policy=round_robin\|least_loaded`) |
//! | POST | `/api/v1/services/{name}/report` | Report a proxied request's outcome |
//! | POST | `/api/v1/sagas` | Run a saga of HTTP steps |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use meshgate_balancer::LoadBalancer;
use meshgate_health::{HealthReporter, Transport};
use meshgate_metrics::GatewayMetrics;
use meshgate_registry::ReplicaRegistry;
use meshgate_saga::SagaOrchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: ReplicaRegistry,
    pub reporter: HealthReporter,
    pub balancer: Arc<LoadBalancer>,
    pub orchestrator: SagaOrchestrator,
    pub metrics: GatewayMetrics,
    /// Used by saga steps.
    pub transport: Arc<dyn Transport>,
    pub request_timeout: Duration,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route("/services/{name}/select", get(handlers::select_replica))
        .route("/services/{name}/report", post(handlers::report_request))
        .route("/sagas", post(handlers::run_saga))
        .with_state(state.clone());

    Router::new()
        .route("/status", get(handlers::gateway_status))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
