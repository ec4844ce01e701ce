//! meshgate-metrics — counters for external scraping.
//!
//! ```text
//! GatewayMetrics
//!   ├── record_failure() / record_trip()  ← breaker path, per replica
//!   ├── record_eviction()                 ← lifecycle manager
//!   ├── record_saga()                     ← saga orchestrator
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus(snapshot, registry view) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{GatewayMetrics, MetricsSnapshot, ReplicaCounters};
pub use prometheus::render_prometheus;
