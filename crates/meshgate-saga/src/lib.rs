//! meshgate-saga — runs an ordered list of remote steps and, when one
//! fails, undoes the ones that already succeeded in reverse order.
//!
//! Sagas live only for the duration of `SagaOrchestrator::run_saga`:
//! nothing is persisted, and a saga interrupted by a process crash is
//! abandoned.

pub mod error;
pub mod http;
pub mod orchestrator;
pub mod step;

pub use error::StepError;
pub use http::{HttpSagaStep, HttpStepDefinition};
pub use orchestrator::{SagaOrchestrator, SagaOutcome, SagaStatus, StepResult};
pub use step::{SagaStep, StepFuture};
