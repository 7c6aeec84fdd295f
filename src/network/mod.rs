//! # Network Reconciler
//!
//! Keeps exposed containers attached to the bridge network shared with the
//! proxy, so upstream clusters can resolve containers by name. Both
//! operations are idempotent and every runtime call carries a deadline.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::errors::{Error, Result};
use crate::runtime::{with_deadline, SharedRuntime};

/// Driver used when the shared network has to be created
pub const NETWORK_DRIVER: &str = "bridge";

/// Runtime error fragments meaning "the container is already on that network".
const ALREADY_CONNECTED_MARKERS: &[&str] =
    &["already connected", "already exists in network", "already attached"];

/// Whether a runtime error message reports an existing attachment.
pub fn is_already_connected(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    ALREADY_CONNECTED_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone)]
pub struct NetworkReconciler {
    runtime: SharedRuntime,
    network_name: String,
    call_timeout: Duration,
}

impl NetworkReconciler {
    pub fn new(runtime: SharedRuntime, network_name: impl Into<String>, call_timeout: Duration) -> Self {
        Self { runtime, network_name: network_name.into(), call_timeout }
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Return the id of the network called `name`, creating it if absent.
    #[instrument(skip(self))]
    pub async fn ensure_network(&self, name: &str) -> Result<String> {
        if let Some(id) = self.find_network(name).await? {
            debug!(network = %name, network_id = %id, "Network already present");
            return Ok(id);
        }

        let created = with_deadline(
            self.call_timeout,
            "network create",
            self.runtime.create_network(name, NETWORK_DRIVER),
        )
        .await;

        match created {
            Ok(id) => {
                info!(network = %name, network_id = %id, driver = NETWORK_DRIVER, "Created network");
                Ok(id)
            }
            // Lost a creation race with another client; use the winner's network.
            Err(Error::Runtime(message)) => match self.find_network(name).await? {
                Some(id) => Ok(id),
                None => Err(Error::runtime(message)),
            },
            Err(e) => Err(e),
        }
    }

    /// Attach `container` to `network_id`; an existing attachment is success.
    #[instrument(skip(self))]
    pub async fn connect(&self, container: &str, network_id: &str) -> Result<()> {
        let result = with_deadline(
            self.call_timeout,
            "network connect",
            self.runtime.connect_network(network_id, container),
        )
        .await;

        match result {
            Ok(()) => {
                info!(container = %container, network_id = %network_id, "Connected container to network");
                Ok(())
            }
            Err(Error::Runtime(message)) if is_already_connected(&message) => {
                debug!(container = %container, network_id = %network_id, "Container already attached");
                Ok(())
            }
            Err(e) => {
                warn!(container = %container, network_id = %network_id, error = %e, "Failed to connect container to network");
                Err(e)
            }
        }
    }

    /// Ensure the shared network exists and `container` is attached to it.
    pub async fn attach(&self, container: &str) -> Result<String> {
        let network_id = self.ensure_network(&self.network_name).await?;
        self.connect(container, &network_id).await?;
        Ok(network_id)
    }

    async fn find_network(&self, name: &str) -> Result<Option<String>> {
        let networks =
            with_deadline(self.call_timeout, "network list", self.runtime.list_networks()).await?;
        Ok(networks.into_iter().find(|n| n.name == name).map(|n| n.id))
    }
}
