//! In-memory container runtime.
//!
//! Backs the `memory` runtime mode (running the control plane without a
//! container engine) and the test suites. Mirrors the Docker engine's
//! observable behaviour, including its "already exists in network" error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ContainerInfo, ContainerRuntime, NetworkInfo, RUNNING_STATUS};
use crate::errors::{Error, Result};

#[derive(Debug, Default)]
struct MemoryNetwork {
    name: String,
    members: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<String, ContainerInfo>,
    networks: HashMap<String, MemoryNetwork>,
    latency: Option<Duration>,
}

/// Counters for the calls a test may want to assert on
#[derive(Debug, Default)]
pub struct CallCounts {
    pub inspect: AtomicUsize,
    pub create_network: AtomicUsize,
    pub connect: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: RwLock<Inner>,
    unreachable: AtomicBool,
    next_id: AtomicUsize,
    pub calls: CallCounts,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container
    pub async fn add_container(&self, name: &str) {
        self.add_container_with_status(name, RUNNING_STATUS).await;
    }

    pub async fn add_container_with_status(&self, name: &str, status: &str) {
        let id = format!("ctr{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.write().await;
        inner.containers.insert(
            name.to_string(),
            ContainerInfo { id, name: name.to_string(), status: status.to_string() },
        );
    }

    pub async fn remove_container(&self, name: &str) {
        self.inner.write().await.containers.remove(name);
    }

    /// Make every subsequent call fail as if the engine were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every subsequent call
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().await.latency = latency;
    }

    /// Remove a network out-of-band
    pub async fn drop_network(&self, name: &str) {
        self.inner.write().await.networks.retain(|_, n| n.name != name);
    }

    /// Whether `container` is attached to the network called `network_name`
    pub async fn is_attached(&self, network_name: &str, container: &str) -> bool {
        let inner = self.inner.read().await;
        inner.networks.values().any(|n| n.name == network_name && n.members.contains(container))
    }

    pub async fn network_count(&self) -> usize {
        self.inner.read().await.networks.len()
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.inner.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::runtime("Cannot connect to the container runtime"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.calls.inspect.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        Ok(self.inner.read().await.containers.get(name).cloned())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        self.enter().await?;
        let inner = self.inner.read().await;
        let mut networks: Vec<NetworkInfo> = inner
            .networks
            .iter()
            .map(|(id, n)| NetworkInfo { id: id.clone(), name: n.name.clone() })
            .collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    async fn create_network(&self, name: &str, _driver: &str) -> Result<String> {
        self.calls.create_network.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        let mut inner = self.inner.write().await;
        if inner.networks.values().any(|n| n.name == name) {
            return Err(Error::runtime(format!("network with name {} already exists", name)));
        }
        let id = format!("net{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed));
        inner
            .networks
            .insert(id.clone(), MemoryNetwork { name: name.to_string(), members: HashSet::new() });
        Ok(id)
    }

    async fn connect_network(&self, network_id: &str, container: &str) -> Result<()> {
        self.calls.connect.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        let mut inner = self.inner.write().await;
        if !inner.containers.contains_key(container) {
            return Err(Error::runtime(format!("No such container: {}", container)));
        }
        let network = inner
            .networks
            .get_mut(network_id)
            .ok_or_else(|| Error::runtime(format!("network {} not found", network_id)))?;

        if !network.members.insert(container.to_string()) {
            return Err(Error::runtime(format!(
                "endpoint with name {} already exists in network {}",
                container, network.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inspect_reports_seeded_containers() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("web-main").await;
        runtime.add_container_with_status("db-main", "exited").await;

        assert!(runtime.inspect_container("web-main").await.unwrap().unwrap().is_running());
        assert!(!runtime.inspect_container("db-main").await.unwrap().unwrap().is_running());
        assert!(runtime.inspect_container("ghost-main").await.unwrap().is_none());
        assert_eq!(runtime.calls.inspect.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn second_connect_reports_already_exists() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("web-main").await;
        let id = runtime.create_network("zeropoint-network", "bridge").await.unwrap();

        runtime.connect_network(&id, "web-main").await.unwrap();
        let err = runtime.connect_network(&id, "web-main").await.unwrap_err();
        assert!(err.to_string().contains("already exists in network"));
        assert!(runtime.is_attached("zeropoint-network", "web-main").await);
    }

    #[tokio::test]
    async fn unreachable_runtime_fails_every_call() {
        let runtime = MemoryRuntime::new();
        runtime.set_unreachable(true);

        assert!(runtime.list_networks().await.unwrap_err().is_transient());
        assert!(runtime.inspect_container("web-main").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_network_names_are_rejected() {
        let runtime = MemoryRuntime::new();
        runtime.create_network("zeropoint-network", "bridge").await.unwrap();
        assert!(runtime.create_network("zeropoint-network", "bridge").await.is_err());
        assert_eq!(runtime.network_count().await, 1);
    }
}
