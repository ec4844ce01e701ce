//! Discovery collaborators: where the live replica set comes from.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use meshgate_registry::DiscoveredReplica;
use tracing::debug;

use crate::error::DiscoveryError;

pub type DiscoveryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<DiscoveredReplica>, DiscoveryError>> + Send + 'a>>;

/// Lists the replicas of a service that are currently live.
pub trait Discovery: Send + Sync {
    fn list_live_replicas<'a>(&'a self, service: &'a str) -> DiscoveryFuture<'a>;
}

/// Fixed replica lists, typically from `[[services]]` in the config.
///
/// The address doubles as the container reference.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Vec<DiscoveredReplica>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the replica list of one service.
    pub fn set(&self, service: &str, addresses: &[String]) {
        let replicas = addresses
            .iter()
            .map(|a| DiscoveredReplica::new(a.as_str(), a.as_str()))
            .collect();
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.to_string(), replicas);
    }

    pub fn with_service(self, service: &str, addresses: &[String]) -> Self {
        self.set(service, addresses);
        self
    }
}

impl Discovery for StaticDiscovery {
    fn list_live_replicas<'a>(&'a self, service: &'a str) -> DiscoveryFuture<'a> {
        let result = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .cloned()
            .ok_or_else(|| DiscoveryError::UnknownService(service.to_string()));
        Box::pin(async move { result })
    }
}

/// Resolves `<service>:<port>` through the system resolver.
///
/// Container runtimes with an embedded DNS (compose networks, for one)
/// answer a service name with one address per running replica. Each
/// resolved IP becomes a replica whose container reference is the IP.
#[derive(Debug, Default, Clone)]
pub struct DnsDiscovery {
    ports: HashMap<String, u16>,
}

impl DnsDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: &str, port: u16) -> Self {
        self.ports.insert(service.to_string(), port);
        self
    }
}

impl Discovery for DnsDiscovery {
    fn list_live_replicas<'a>(&'a self, service: &'a str) -> DiscoveryFuture<'a> {
        Box::pin(async move {
            let port = *self
                .ports
                .get(service)
                .ok_or_else(|| DiscoveryError::UnknownService(service.to_string()))?;
            let host = format!("{service}:{port}");

            let addrs = tokio::net::lookup_host(&host)
                .await
                .map_err(|e| DiscoveryError::Resolve {
                    host: host.clone(),
                    reason: e.to_string(),
                })?;

            // Resolver order is not stable; sort so registration order is.
            let unique: BTreeSet<_> = addrs.collect();
            let replicas: Vec<DiscoveredReplica> = unique
                .into_iter()
                .map(|addr| DiscoveredReplica::new(addr.to_string(), addr.ip().to_string()))
                .collect();
            debug!(%service, count = replicas.len(), "dns discovery resolved");
            Ok(replicas)
        })
    }
}
