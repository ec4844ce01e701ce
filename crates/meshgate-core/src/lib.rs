//! meshgate-core — configuration shared by every meshgate subsystem.
//!
//! `GatewayConfig` is parsed from `meshgate.toml`. Every section and field
//! is optional; accessors fill in the defaults so callers never deal with
//! `Option` plumbing.

pub mod config;
pub mod duration;

pub use config::{
    BreakerSection, DiscoveryMode, DiscoverySection, GatewayConfig, GatewaySection,
    HealthSection, ServiceSection, TerminatorSection,
};
pub use duration::{parse_duration, DurationError};
