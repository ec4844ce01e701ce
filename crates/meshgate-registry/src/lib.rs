//! meshgate-registry — the replica registry for meshgate.
//!
//! Holds, per service, the ordered list of known replicas together with
//! their mutable health and circuit state. It is the only long-lived
//! shared mutable structure in the gateway; every other component reads
//! and writes replica state through its accessors.
//!
//! # Locking
//!
//! ```text
//! ReplicaRegistry
//!   └── RwLock<HashMap<service, ServiceSlot>>   (service creation only)
//!       └── ServiceSlot
//!           ├── RwLock<ReplicaList>              (structural changes: discovery, eviction)
//!           └── per replica: Mutex<ReplicaRecord> (failure counts, breaker state, load)
//! ```
//!
//! Readers always get a cloned snapshot, so a reconciliation in progress
//! is never observed half-applied.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::{ReplicaRegistry, UpsertStats};
pub use types::*;
