//! meshgate-health — replica health checking and circuit breaking.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── liveness tick (every `interval`)
//!   │   └── HealthProbe::probe_all() → ProbeOutcome per replica
//!   ├── breaker sweep (every `sweep_interval`)
//!   └── HealthReporter
//!       ├── CircuitBreaker transitions under the replica's registry lock
//!       ├── GatewayMetrics counters
//!       └── optional TripCallback (lifecycle eviction)
//! ```
//!
//! # Breaker model
//!
//! Closed → Open after `failure_threshold` consecutive failures; Open →
//! Closed once `cooling_period` has passed since the last failure. There
//! is no half-open trial: the reset is unconditional and a still-broken
//! replica has to fail `failure_threshold` more times to trip again.

pub mod breaker;
pub mod monitor;
pub mod probe;
pub mod reporter;
pub mod transport;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, Transition};
pub use monitor::{HealthMonitor, TickStats};
pub use probe::{HealthProbe, ProbeOutcome};
pub use reporter::{BoxFuture, HealthReporter, TripCallback};
pub use transport::{
    HttpTransport, Transport, TransportError, TransportFuture, TransportRequest,
    TransportResponse,
};
