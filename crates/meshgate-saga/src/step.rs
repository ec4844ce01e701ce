//! The remote step capability.

use std::future::Future;
use std::pin::Pin;

use crate::error::StepError;

pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send + 'a>>;

/// One forward action and its inverse.
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;

    /// Perform the action and return the id of the resource it created.
    fn execute(&self) -> StepFuture<'_, String>;

    /// Undo a previous `execute` that created `resource_id`.
    fn compensate<'a>(&'a self, resource_id: &'a str) -> StepFuture<'a, ()>;
}
