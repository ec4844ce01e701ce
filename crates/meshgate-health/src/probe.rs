//! Health/load probe against a single replica.
//!
//! A probe never fails: connection errors, non-2xx responses and timeouts
//! all normalize to `ok = false, load = +Inf`. The probe itself has no side
//! effects; callers persist the outcome through the `HealthReporter`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::debug;

use crate::transport::{Transport, TransportRequest};

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub ok: bool,
    /// Reported load; `f64::INFINITY` when the probe failed.
    pub load: f64,
    pub latency: Duration,
}

impl ProbeOutcome {
    pub fn healthy(load: f64, latency: Duration) -> Self {
        Self {
            ok: true,
            load,
            latency,
        }
    }

    pub fn failed(latency: Duration) -> Self {
        Self {
            ok: false,
            load: f64::INFINITY,
            latency,
        }
    }
}

/// Issues status/load queries against replicas.
#[derive(Clone)]
pub struct HealthProbe {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one replica.
    ///
    /// The deadline is enforced here as well as in the transport, so a
    /// transport that ignores `request.timeout` cannot stall a caller.
    pub async fn probe(&self, address: &str, path: &str) -> ProbeOutcome {
        let request = TransportRequest::get(address, path, self.timeout);
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.transport.call(&request)).await;
        let latency = started.elapsed();

        match result {
            Ok(called) => match called.and_then(|resp| resp.error_for_status(&request)) {
                Ok(resp) => {
                    let load = resp
                        .json()
                        .and_then(|v| v.get("load").and_then(|l| l.as_f64()))
                        .unwrap_or(0.0);
                    ProbeOutcome::healthy(load, latency)
                }
                Err(e) => {
                    debug!(%address, error = %e, "probe failed");
                    ProbeOutcome::failed(latency)
                }
            },
            Err(_) => {
                debug!(%address, timeout = ?self.timeout, "probe timed out");
                ProbeOutcome::failed(latency)
            }
        }
    }

    /// Probe every address in parallel and wait for all of them.
    ///
    /// Results come back in input order.
    pub async fn probe_all(&self, addresses: &[String], path: &str) -> Vec<(String, ProbeOutcome)> {
        let probes = addresses.iter().map(|address| async move {
            let outcome = self.probe(address, path).await;
            (address.clone(), outcome)
        });
        join_all(probes).await
    }
}
