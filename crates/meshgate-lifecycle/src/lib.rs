//! meshgate-lifecycle — keeps the registry's replica lists in line with
//! what is actually running.
//!
//! Two independent triggers mutate the registry here:
//!
//! - **Discovery tick**: periodically asks a `Discovery` collaborator for
//!   the live replica set of each service and reconciles it.
//! - **Breaker trip**: evicts the tripped replica, asking a `Terminator`
//!   to tear down its compute unit first. A failed teardown is logged and
//!   the eviction still happens.
//!
//! The registry's eviction markers keep a discovery tick from re-adding or
//! dropping a replica while its eviction is in flight.

pub mod discovery;
pub mod error;
pub mod manager;
pub mod terminator;

pub use discovery::{Discovery, DiscoveryFuture, DnsDiscovery, StaticDiscovery};
pub use error::{DiscoveryError, TerminationError};
pub use manager::ReplicaLifecycleManager;
pub use terminator::{CommandTerminator, LogTerminator, TerminateFuture, Terminator};
