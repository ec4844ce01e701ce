//! meshgate-balancer — picks a replica per request.
//!
//! Both policies consult the circuit breaker through the registry so a
//! selection also applies the passive reset to any replica it touches.
//! Open replicas are never returned.

pub mod balancer;
pub mod error;
pub mod least_loaded;
pub mod policy;
pub mod round_robin;

pub use balancer::LoadBalancer;
pub use error::{BalancerError, BalancerResult};
pub use least_loaded::LeastLoaded;
pub use policy::{ParsePolicyError, Policy, SelectFuture, SelectionPolicy};
pub use round_robin::RoundRobin;
