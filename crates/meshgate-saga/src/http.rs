//! Saga steps that call a fronted service over HTTP.
//!
//! `execute` sends `POST {path}` with a JSON body to a replica picked by the
//! load balancer and reads the created resource's id from the response.
//! `compensate` sends `DELETE {compensate_path}/{id}` to any eligible
//! replica of the same service.

use std::sync::Arc;
use std::time::Duration;

use meshgate_balancer::LoadBalancer;
use meshgate_health::{Transport, TransportRequest, TransportResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StepError;
use crate::step::{SagaStep, StepFuture};

fn default_id_field() -> String {
    "id".to_string()
}

/// Wire form of one HTTP step, as posted to the saga endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpStepDefinition {
    pub name: String,
    pub service: String,
    /// Path of the create call, e.g. `/api/users/register`.
    pub path: String,
    #[serde(default)]
    pub body: Value,
    /// Response field holding the created id. A leading `/` makes it a
    /// JSON pointer into nested objects.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Collection path the id is appended to for the undo call.
    pub compensate_path: String,
}

pub struct HttpSagaStep {
    definition: HttpStepDefinition,
    balancer: Arc<LoadBalancer>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl HttpSagaStep {
    pub fn new(
        definition: HttpStepDefinition,
        balancer: Arc<LoadBalancer>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            definition,
            balancer,
            transport,
            timeout,
        }
    }

    pub fn definition(&self) -> &HttpStepDefinition {
        &self.definition
    }

    async fn send(&self, make: impl FnOnce(&str) -> TransportRequest) -> Result<TransportResponse, StepError> {
        let replica = self.balancer.select(&self.definition.service, None).await?;
        let request = make(&replica.address);
        debug!(
            step = %self.definition.name,
            method = %request.method,
            uri = %request.uri(),
            "saga step call"
        );
        // 4xx is the service refusing the step, not the replica failing.
        let result = self.transport.call(&request).await;
        let ok = matches!(&result, Ok(r) if r.status < 500);
        self.balancer
            .report(&self.definition.service, &replica.address, ok);

        let response = result?;
        if !response.is_success() {
            return Err(StepError::Rejected {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(response)
    }

    fn resource_id(&self, response: &TransportResponse) -> Result<String, StepError> {
        let field = &self.definition.id_field;
        let missing = || StepError::MissingResourceId {
            field: field.clone(),
            body: String::from_utf8_lossy(&response.body).into_owned(),
        };
        let json = response.json().ok_or_else(missing)?;
        let value = if field.starts_with('/') {
            json.pointer(field)
        } else {
            json.get(field)
        };
        match value {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(missing()),
        }
    }
}

impl SagaStep for HttpSagaStep {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn execute(&self) -> StepFuture<'_, String> {
        Box::pin(async move {
            let def = &self.definition;
            let response = self
                .send(|address| TransportRequest::post_json(address, &def.path, &def.body, self.timeout))
                .await?;
            self.resource_id(&response)
        })
    }

    fn compensate<'a>(&'a self, resource_id: &'a str) -> StepFuture<'a, ()> {
        Box::pin(async move {
            let path = format!(
                "{}/{}",
                self.definition.compensate_path.trim_end_matches('/'),
                resource_id
            );
            self.send(|address| TransportRequest::delete(address, &path, self.timeout))
                .await?;
            Ok(())
        })
    }
}
