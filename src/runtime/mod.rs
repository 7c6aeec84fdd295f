//! # Container Runtime
//!
//! The control plane only needs a narrow view of the container runtime:
//! whether a container exists (and is running), and the ability to list,
//! create and join bridge networks. [`ContainerRuntime`] captures exactly
//! that, with a Docker Engine implementation and an in-memory one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RuntimeConfig, RuntimeKind};
use crate::errors::{Error, Result};

pub mod docker;
pub mod memory;

pub use docker::DockerRuntime;
pub use memory::MemoryRuntime;

/// Status string the runtime reports for a running container
pub const RUNNING_STATUS: &str = "running";

/// Snapshot of a container's identity and state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == RUNNING_STATUS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
}

/// Operations the control plane needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Look up a container by name; `Ok(None)` when it does not exist.
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>>;

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>>;

    /// Create a network and return its id.
    async fn create_network(&self, name: &str, driver: &str) -> Result<String>;

    /// Attach a container to a network. An "already attached" condition is
    /// returned as an error carrying the runtime's own message.
    async fn connect_network(&self, network_id: &str, container: &str) -> Result<()>;
}

/// Shared handle used throughout the crate
pub type SharedRuntime = Arc<dyn ContainerRuntime>;

/// Build the runtime selected by configuration.
pub fn build_runtime(config: &RuntimeConfig) -> SharedRuntime {
    match config.kind {
        RuntimeKind::Docker => Arc::new(DockerRuntime::new(&config.docker_socket)),
        RuntimeKind::Memory => Arc::new(MemoryRuntime::new()),
    }
}

/// Run a runtime call with an upper bound, mapping expiry to [`Error::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "{} did not complete within {}ms",
            operation,
            deadline.as_millis()
        ))),
    }
}
