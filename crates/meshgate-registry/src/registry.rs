//! ReplicaRegistry: in-memory replica state for all fronted services.
//!
//! All operations are scoped to the smallest key that keeps them correct:
//! structural list changes lock one service, health updates lock one
//! replica. Nothing here performs I/O, so every lock is a short-held
//! `std::sync` lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::types::*;

/// One replica's record behind its own lock.
#[derive(Debug)]
struct ReplicaEntry {
    address: String,
    record: Mutex<ReplicaRecord>,
}

/// Structural state of a service: the ordered replica list plus the
/// addresses whose eviction is in flight.
#[derive(Debug, Default)]
struct ReplicaList {
    entries: Vec<Arc<ReplicaEntry>>,
    evicting: HashSet<String>,
}

impl ReplicaList {
    fn find(&self, address: &str) -> Option<&Arc<ReplicaEntry>> {
        self.entries.iter().find(|e| e.address == address)
    }
}

#[derive(Debug)]
struct ServiceSlot {
    probe_path: String,
    replicas: RwLock<ReplicaList>,
}

impl ServiceSlot {
    fn new(probe_path: &str) -> Self {
        Self {
            probe_path: probe_path.to_string(),
            replicas: RwLock::new(ReplicaList::default()),
        }
    }

    fn records(&self) -> Vec<ReplicaRecord> {
        read(&self.replicas)
            .entries
            .iter()
            .map(|e| lock(&e.record).clone())
            .collect()
    }
}

/// Outcome of a discovery reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpsertStats {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl UpsertStats {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Thread-safe registry of services and their replicas.
///
/// `Clone` shares the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct ReplicaRegistry {
    services: Arc<RwLock<HashMap<String, Arc<ServiceSlot>>>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Services ───────────────────────────────────────────────────

    /// Register a service if it is not known yet. Returns true if created.
    pub fn register_service(&self, name: &str, probe_path: &str) -> bool {
        let mut services = write(&self.services);
        if services.contains_key(name) {
            return false;
        }
        services.insert(name.to_string(), Arc::new(ServiceSlot::new(probe_path)));
        info!(service = %name, %probe_path, "service registered");
        true
    }

    /// Names of all known services, sorted.
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.services).keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of one service.
    pub fn get(&self, name: &str) -> RegistryResult<ServiceDefinition> {
        let slot = self.slot(name)?;
        Ok(ServiceDefinition {
            name: name.to_string(),
            probe_path: slot.probe_path.clone(),
            replicas: slot.records(),
        })
    }

    /// Snapshot of every service, sorted by name.
    pub fn snapshot(&self) -> Vec<ServiceDefinition> {
        self.list_services()
            .iter()
            .filter_map(|name| self.get(name).ok())
            .collect()
    }

    // ── Replicas ───────────────────────────────────────────────────

    /// Replicas of a service in registration order.
    pub fn list_replicas(&self, name: &str) -> RegistryResult<Vec<ReplicaRecord>> {
        Ok(self.slot(name)?.records())
    }

    /// Reconcile a service's replica list against a freshly discovered set.
    ///
    /// New addresses are appended with zeroed health state; addresses no
    /// longer discovered are dropped together with their breaker state.
    /// Addresses with an eviction in flight are left to the eviction.
    /// The service is created on first discovery.
    pub fn upsert_replicas(
        &self,
        name: &str,
        discovered: &[DiscoveredReplica],
    ) -> UpsertStats {
        let slot = self.slot_or_create(name);
        let mut list = write(&slot.replicas);
        let mut stats = UpsertStats::default();

        let live: HashSet<&str> = discovered.iter().map(|d| d.address.as_str()).collect();

        let ReplicaList { entries, evicting } = &mut *list;
        entries.retain(|e| {
            let keep = live.contains(e.address.as_str()) || evicting.contains(&e.address);
            if !keep {
                stats.removed.push(e.address.clone());
            }
            keep
        });

        for d in discovered {
            if evicting.contains(&d.address) || entries.iter().any(|e| e.address == d.address) {
                continue;
            }
            entries.push(Arc::new(ReplicaEntry {
                address: d.address.clone(),
                record: Mutex::new(ReplicaRecord::new(&d.address, &d.container_ref)),
            }));
            stats.added.push(d.address.clone());
        }

        if !stats.is_empty() {
            info!(
                service = %name,
                added = stats.added.len(),
                removed = stats.removed.len(),
                total = entries.len(),
                "replicas reconciled"
            );
        }
        stats
    }

    /// Apply `f` to exactly one replica under its lock.
    pub fn mutate<R>(
        &self,
        name: &str,
        address: &str,
        f: impl FnOnce(&mut ReplicaRecord) -> R,
    ) -> RegistryResult<R> {
        let slot = self.slot(name)?;
        let entry = read(&slot.replicas)
            .find(address)
            .cloned()
            .ok_or_else(|| replica_not_found(name, address))?;
        let mut record = lock(&entry.record);
        Ok(f(&mut record))
    }

    /// Mark a replica as being evicted and return its current record.
    ///
    /// Returns `Ok(None)` if an eviction for the address is already in flight.
    pub fn begin_eviction(&self, name: &str, address: &str) -> RegistryResult<Option<ReplicaRecord>> {
        let slot = self.slot(name)?;
        let mut list = write(&slot.replicas);
        let record = list
            .find(address)
            .map(|e| lock(&e.record).clone())
            .ok_or_else(|| replica_not_found(name, address))?;
        if !list.evicting.insert(address.to_string()) {
            return Ok(None);
        }
        debug!(service = %name, %address, "eviction started");
        Ok(Some(record))
    }

    /// Remove an evicted replica and clear its eviction marker.
    ///
    /// Returns true if the replica was still present.
    pub fn finish_eviction(&self, name: &str, address: &str) -> RegistryResult<bool> {
        let slot = self.slot(name)?;
        let mut list = write(&slot.replicas);
        list.evicting.remove(address);
        let before = list.entries.len();
        list.entries.retain(|e| e.address != address);
        let removed = list.entries.len() != before;
        debug!(service = %name, %address, removed, "eviction finished");
        Ok(removed)
    }

    /// Whether an eviction is in flight for the address.
    #[cfg(test)]
    fn is_evicting(&self, name: &str, address: &str) -> bool {
        self.slot(name)
            .map(|slot| read(&slot.replicas).evicting.contains(address))
            .unwrap_or(false)
    }

    fn slot(&self, name: &str) -> RegistryResult<Arc<ServiceSlot>> {
        read(&self.services)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))
    }

    fn slot_or_create(&self, name: &str) -> Arc<ServiceSlot> {
        if let Ok(slot) = self.slot(name) {
            return slot;
        }
        write(&self.services)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceSlot::new(DEFAULT_PROBE_PATH)))
            .clone()
    }
}

fn replica_not_found(service: &str, address: &str) -> RegistryError {
    RegistryError::ReplicaNotFound {
        service: service.to_string(),
        address: address.to_string(),
    }
}

// Registry critical sections never panic mid-update, so a poisoned lock
// still guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
