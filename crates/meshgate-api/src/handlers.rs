//! REST API handlers.
//!
//! Handlers read and write through the registry, balancer and saga
//! orchestrator held in `ApiState` and return JSON responses.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use meshgate_balancer::{BalancerError, Policy};
use meshgate_registry::{RegistryError, ServiceStatus};
use meshgate_saga::{HttpSagaStep, HttpStepDefinition, SagaStatus, SagaStep};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn registry_error(e: &RegistryError) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn service_views(state: &ApiState) -> Vec<ServiceStatus> {
    let now = Instant::now();
    state
        .registry
        .snapshot()
        .iter()
        .map(|s| s.status(now))
        .collect()
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub message: String,
    pub timestamp: u64,
    pub services: Vec<ServiceStatus>,
}

/// GET /status
pub async fn gateway_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(GatewayStatus {
        message: "API Gateway is running".to_string(),
        timestamp: epoch_secs(),
        services: service_views(&state),
    })
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(service_views(&state))
}

/// GET /api/v1/services/{name}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&name) {
        Ok(service) => ApiResponse::ok(service.status(Instant::now())).into_response(),
        Err(e) => registry_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectQuery {
    pub policy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub address: String,
    pub container_ref: String,
    pub policy: Policy,
}

/// GET /api/v1/services/{name}/select
pub async fn select_replica(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<SelectQuery>,
) -> impl IntoResponse {
    let policy = match query.policy.as_deref().map(str::parse::<Policy>).transpose() {
        Ok(p) => p.unwrap_or(state.balancer.default_policy()),
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };

    match state.balancer.select(&name, Some(policy)).await {
        Ok(replica) => ApiResponse::ok(Selection {
            address: replica.address,
            container_ref: replica.container_ref,
            policy,
        })
        .into_response(),
        Err(BalancerError::Registry(e)) => registry_error(&e),
        Err(e @ BalancerError::Unavailable(_)) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportRequest {
    pub address: String,
    pub ok: bool,
}

/// POST /api/v1/services/{name}/report
pub async fn report_request(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<ReportRequest>,
) -> impl IntoResponse {
    match state.reporter.report_request(&name, &req.address, req.ok) {
        Ok(transition) => ApiResponse::ok(serde_json::json!({
            "service": name,
            "address": req.address,
            "transition": format!("{transition:?}").to_lowercase(),
        }))
        .into_response(),
        Err(e) => registry_error(&e),
    }
}

// ── Sagas ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SagaRequest {
    pub steps: Vec<HttpStepDefinition>,
}

/// POST /api/v1/sagas
///
/// Runs to a terminal status before responding. A failed saga still
/// returns the full outcome so orphaned resources can be reconciled.
pub async fn run_saga(
    State(state): State<ApiState>,
    Json(req): Json<SagaRequest>,
) -> impl IntoResponse {
    if req.steps.is_empty() {
        return error_response("saga has no steps", StatusCode::BAD_REQUEST).into_response();
    }

    let steps: Vec<Box<dyn SagaStep>> = req
        .steps
        .into_iter()
        .map(|def| {
            Box::new(HttpSagaStep::new(
                def,
                state.balancer.clone(),
                state.transport.clone(),
                state.request_timeout,
            )) as Box<dyn SagaStep>
        })
        .collect();

    let outcome = state.orchestrator.run_saga(&steps).await;
    debug!(saga_id = %outcome.saga_id, status = ?outcome.status, "saga request finished");

    if outcome.status == SagaStatus::Completed {
        return ApiResponse::ok(outcome).into_response();
    }
    warn!(saga_id = %outcome.saga_id, orphaned = outcome.orphaned().count(), "saga failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiResponse {
            success: false,
            error: Some("saga failed".to_string()),
            data: Some(outcome),
        }),
    )
        .into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = meshgate_metrics::render_prometheus(&state.metrics.snapshot(), &state.registry.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::Body;
    use axum::response::Response;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use meshgate_balancer::LoadBalancer;
    use meshgate_health::{
        CircuitBreaker, CircuitBreakerConfig, HealthProbe, HealthReporter, Transport,
        TransportFuture, TransportRequest, TransportResponse,
    };
    use meshgate_metrics::GatewayMetrics;
    use meshgate_registry::{DiscoveredReplica, ReplicaRegistry};
    use meshgate_saga::SagaOrchestrator;
    use serde_json::{Value, json};

    use super::*;

    /// `POST /api/users` → `{"id": "u1"}`, `POST /api/events` → 500,
    /// anything else → 200 `{"load": 1}`. Records `METHOD path`.
    #[derive(Default)]
    struct FakeServices {
        calls: Mutex<Vec<String>>,
    }

    impl Transport for FakeServices {
        fn call<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", request.method, request.path));
            let (status, body) = match (request.method.as_str(), request.path.as_str()) {
                ("POST", "/api/users") => (201, r#"{"id":"u1"}"#),
                ("POST", "/api/events") => (500, "db down"),
                _ => (200, r#"{"load":1}"#),
            };
            Box::pin(async move {
                Ok(TransportResponse {
                    status,
                    body: Bytes::from_static(body.as_bytes()),
                })
            })
        }
    }

    fn test_state() -> (ApiState, Arc<FakeServices>) {
        let registry = ReplicaRegistry::new();
        for (svc, addr) in [("user-service", "10.0.0.2:5002"), ("sports-service", "10.0.0.1:5001")] {
            registry.upsert_replicas(svc, &[DiscoveredReplica::new(addr, format!("ctr-{svc}"))]);
        }
        let metrics = GatewayMetrics::new();
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cooling_period: Duration::from_secs(60),
        });
        let reporter = HealthReporter::new(registry.clone(), breaker, metrics.clone());
        let transport = Arc::new(FakeServices::default());
        let probe = HealthProbe::new(transport.clone(), Duration::from_millis(200));
        let state = ApiState {
            registry,
            reporter: reporter.clone(),
            balancer: Arc::new(LoadBalancer::new(reporter, probe)),
            orchestrator: SagaOrchestrator::new(metrics.clone()),
            metrics,
            transport: transport.clone(),
            request_timeout: Duration::from_secs(1),
        };
        (state, transport)
    }

    async fn json_body(resp: Response<Body>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn select_query(policy: Option<&str>) -> Query<SelectQuery> {
        Query(SelectQuery {
            policy: policy.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn status_lists_services() {
        let (state, _) = test_state();
        let resp = gateway_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["message"], "API Gateway is running");
        assert_eq!(body["services"].as_array().unwrap().len(), 2);
        assert_eq!(body["services"][0]["name"], "sports-service");
        assert_eq!(body["services"][0]["replicas"][0]["breaker_state"], "closed");
    }

    #[tokio::test]
    async fn get_unknown_service_is_404() {
        let (state, _) = test_state();
        let resp = get_service(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn select_returns_replica() {
        let (state, _) = test_state();
        let resp = select_replica(
            State(state),
            Path("sports-service".to_string()),
            select_query(Some("least_loaded")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["data"]["address"], "10.0.0.1:5001");
        assert_eq!(body["data"]["containerRef"], "ctr-sports-service");
        assert_eq!(body["data"]["policy"], "least_loaded");
    }

    #[tokio::test]
    async fn select_rejects_unknown_policy() {
        let (state, _) = test_state();
        let resp = select_replica(
            State(state),
            Path("sports-service".to_string()),
            select_query(Some("random")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn select_unknown_service_is_404() {
        let (state, _) = test_state();
        let resp = select_replica(State(state), Path("nope".to_string()), select_query(None))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reported_failures_make_service_unavailable() {
        let (state, _) = test_state();
        for _ in 0..2 {
            let resp = report_request(
                State(state.clone()),
                Path("sports-service".to_string()),
                Json(ReportRequest {
                    address: "10.0.0.1:5001".to_string(),
                    ok: false,
                }),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = select_replica(
            State(state),
            Path("sports-service".to_string()),
            select_query(Some("round_robin")),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn report_unknown_replica_is_404() {
        let (state, _) = test_state();
        let resp = report_request(
            State(state),
            Path("sports-service".to_string()),
            Json(ReportRequest {
                address: "10.9.9.9:1".to_string(),
                ok: true,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    fn user_then_event() -> SagaRequest {
        serde_json::from_value(json!({
            "steps": [
                {
                    "name": "create-user",
                    "service": "user-service",
                    "path": "/api/users",
                    "body": {"username": "ana"},
                    "compensatePath": "/api/users"
                },
                {
                    "name": "create-event",
                    "service": "sports-service",
                    "path": "/api/events",
                    "compensatePath": "/api/events"
                }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn failed_saga_compensates_and_reports() {
        let (state, transport) = test_state();
        let metrics = state.metrics.clone();

        let resp = run_saga(State(state), Json(user_then_event()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let body = json_body(resp).await;
        assert_eq!(body["data"]["status"], "Failed");
        assert_eq!(body["data"]["results"][0]["compensated"], true);
        assert_eq!(body["data"]["results"][0]["createdResourceId"], "u1");

        let calls = transport.calls.lock().unwrap().clone();
        let deletes: Vec<_> = calls.iter().filter(|c| c.starts_with("DELETE")).collect();
        assert_eq!(deletes, vec!["DELETE /api/users/u1"]);
        assert_eq!(metrics.snapshot().sagas_failed, 1);
    }

    #[tokio::test]
    async fn empty_saga_is_bad_request() {
        let (state, _) = test_state();
        let resp = run_saga(State(state), Json(SagaRequest { steps: vec![] }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _) = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
