//! Selection policy capability and the built-in policy names.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use meshgate_registry::ReplicaRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BalancerResult;

/// Boxed future returned by [`SelectionPolicy::select`].
pub type SelectFuture<'a> = Pin<Box<dyn Future<Output = BalancerResult<ReplicaRecord>> + Send + 'a>>;

/// Picks one eligible replica of a service.
///
/// New policies (weighted, latency-aware) are new implementations of this
/// trait; `LoadBalancer` only dispatches.
pub trait SelectionPolicy: Send + Sync {
    fn select<'a>(&'a self, service: &'a str) -> SelectFuture<'a>;
}

/// Built-in policies, as named in config and on the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    RoundRobin,
    LeastLoaded,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::RoundRobin => "round_robin",
            Policy::LeastLoaded => "least_loaded",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown selection policy: {0} (expected round_robin or least_loaded)")]
pub struct ParsePolicyError(pub String);

impl FromStr for Policy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Policy::RoundRobin),
            "least_loaded" | "leastloaded" => Ok(Policy::LeastLoaded),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}
