//! Saga orchestrator: drives a saga to a terminal status.
//!
//! ```text
//! Running ──all steps ok──▶ Completed
//!    │
//!    └─step k fails──▶ Compensating ──undo k-1..1──▶ Failed
//! ```
//!
//! Steps run strictly in order. Compensation is best-effort: a failed undo
//! is logged and recorded on its step, and the remaining undos still run.
//! There is no retry, so a failed undo leaves an orphaned resource that the
//! caller can find in the returned results.

use meshgate_metrics::GatewayMetrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StepError;
use crate::step::SagaStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    Running,
    Completed,
    Compensating,
    Failed,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_name: String,
    pub created_resource_id: Option<String>,
    pub compensated: bool,
    /// Why `execute` failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why `compensate` failed; the resource is orphaned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_error: Option<String>,
    /// Body of a successful reply that carried no readable id. The remote
    /// resource was created but cannot be compensated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl StepResult {
    fn new(step_name: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            created_resource_id: None,
            compensated: false,
            error: None,
            compensation_error: None,
            response: None,
        }
    }

    /// Created but not undone after a failed saga.
    pub fn is_orphaned(&self) -> bool {
        self.response.is_some()
            || (self.created_resource_id.is_some() && self.compensation_error.is_some())
    }
}

/// Terminal report of one saga, returned to the caller as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaOutcome {
    pub saga_id: Uuid,
    pub status: SagaStatus,
    /// One entry per step that was attempted, in execution order.
    pub results: Vec<StepResult>,
}

impl SagaOutcome {
    pub fn orphaned(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| r.is_orphaned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SagaOrchestrator {
    metrics: GatewayMetrics,
}

impl SagaOrchestrator {
    pub fn new(metrics: GatewayMetrics) -> Self {
        Self { metrics }
    }

    /// Run `steps` in order, compensating on the first failure.
    pub async fn run_saga(&self, steps: &[Box<dyn SagaStep>]) -> SagaOutcome {
        let mut saga = SagaOutcome {
            saga_id: Uuid::new_v4(),
            status: SagaStatus::Running,
            results: Vec::with_capacity(steps.len()),
        };
        let saga_id = saga.saga_id;
        info!(%saga_id, steps = steps.len(), "saga started");

        for step in steps {
            let mut result = StepResult::new(step.name());
            match step.execute().await {
                Ok(id) => {
                    debug!(%saga_id, step = %step.name(), resource_id = %id, "saga step succeeded");
                    result.created_resource_id = Some(id);
                    saga.results.push(result);
                }
                Err(e) => {
                    warn!(%saga_id, step = %step.name(), error = %e, "saga step failed, compensating");
                    if let StepError::MissingResourceId { body, .. } = &e {
                        error!(%saga_id, step = %step.name(), "step created a resource without a readable id, resource orphaned");
                        result.response = Some(body.clone());
                    }
                    result.error = Some(e.to_string());
                    saga.results.push(result);
                    saga.status = SagaStatus::Compensating;
                    break;
                }
            }
        }

        if saga.status == SagaStatus::Running {
            saga.status = SagaStatus::Completed;
            self.metrics.record_saga(true, 0);
            info!(%saga_id, "saga completed");
            return saga;
        }

        let failures = self.compensate(steps, &mut saga).await;
        saga.status = SagaStatus::Failed;
        self.metrics.record_saga(false, failures);
        info!(%saga_id, compensation_failures = failures, "saga failed");
        saga
    }

    /// Undo every succeeded step in reverse. Returns the number of undos
    /// that failed.
    async fn compensate(&self, steps: &[Box<dyn SagaStep>], saga: &mut SagaOutcome) -> u64 {
        let saga_id = saga.saga_id;
        let mut failures = 0;

        for (step, result) in steps.iter().zip(saga.results.iter_mut()).rev() {
            let Some(id) = result.created_resource_id.as_deref() else {
                continue;
            };
            match step.compensate(id).await {
                Ok(()) => {
                    debug!(%saga_id, step = %step.name(), resource_id = %id, "saga step compensated");
                    result.compensated = true;
                }
                Err(e) => {
                    error!(
                        %saga_id,
                        step = %step.name(),
                        resource_id = %id,
                        error = %e,
                        "compensation failed, resource orphaned"
                    );
                    result.compensation_error = Some(e.to_string());
                    failures += 1;
                }
            }
        }
        failures
    }
}
