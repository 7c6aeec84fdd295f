use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use envoy_types::pb::google::protobuf::Any;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::xds::resources::SERVED_TYPE_URLS;
use crate::xds::snapshot::ConfigurationSnapshot;
use crate::Result;

/// Capacity of the update broadcast channel; slow streams past this lag.
const UPDATE_CHANNEL_CAPACITY: usize = 128;

/// Cached Envoy resource along with metadata required for delta semantics.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResource {
    pub name: String,
    pub type_url: String,
    /// Snapshot version in which this resource last changed
    pub version: String,
    pub body: Any,
}

/// Delta information for a single type URL.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceDelta {
    pub type_url: String,
    pub added_or_updated: Vec<CachedResource>,
    pub removed: Vec<String>,
}

impl ResourceDelta {
    pub fn is_empty(&self) -> bool {
        self.added_or_updated.is_empty() && self.removed.is_empty()
    }
}

/// Broadcast payload describing all resources changed for one node.
#[derive(Clone, Debug, Default)]
pub struct ResourceUpdate {
    pub node_id: String,
    pub version: String,
    pub deltas: Vec<ResourceDelta>,
}

impl ResourceUpdate {
    pub fn touches(&self, type_url: &str) -> bool {
        self.deltas.iter().any(|d| d.type_url == type_url)
    }

    pub fn delta_for(&self, type_url: &str) -> Option<&ResourceDelta> {
        self.deltas.iter().find(|d| d.type_url == type_url)
    }
}

/// Encoded snapshot installed for one node.
#[derive(Debug, Default)]
pub struct NodeSnapshot {
    version: String,
    resources: BTreeMap<String, BTreeMap<String, CachedResource>>,
}

impl NodeSnapshot {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Every resource of `type_url`, ordered by name.
    pub fn resources(&self, type_url: &str) -> Vec<CachedResource> {
        self.resources
            .get(type_url)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Resources of `type_url` restricted to `names`; unknown names are skipped.
    pub fn resources_named(&self, type_url: &str, names: &[String]) -> Vec<CachedResource> {
        let Some(by_name) = self.resources.get(type_url) else {
            return Vec::new();
        };
        let mut selected: Vec<CachedResource> =
            names.iter().filter_map(|name| by_name.get(name).cloned()).collect();
        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected.dedup_by(|a, b| a.name == b.name);
        selected
    }

    pub fn resource_names(&self, type_url: &str) -> Vec<String> {
        self.resources
            .get(type_url)
            .map(|by_name| by_name.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Shared discovery state: the version counter, the per-node snapshot cache
/// and the change broadcast every open stream listens to.
#[derive(Debug)]
pub struct XdsState {
    node_id: String,
    version: AtomicU64,
    update_tx: broadcast::Sender<Arc<ResourceUpdate>>,
    snapshots: RwLock<HashMap<String, Arc<NodeSnapshot>>>,
    shutdown: CancellationToken,
}

impl XdsState {
    /// State serving snapshots to the proxy node `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            node_id: node_id.into(),
            version: AtomicU64::new(0),
            update_tx,
            snapshots: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Issue a fresh version string. Safe to call concurrently; every caller
    /// gets a distinct, strictly increasing value.
    pub fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Last version issued by [`XdsState::next_version`].
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Installed snapshot for `node_id`, if any.
    pub fn snapshot(&self, node_id: &str) -> Option<Arc<NodeSnapshot>> {
        self.snapshots.read().unwrap_or_else(PoisonError::into_inner).get(node_id).cloned()
    }

    /// Token cancelled when the discovery server shuts down; open streams
    /// end when it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Arc<ResourceUpdate>> {
        self.update_tx.subscribe()
    }

    /// Install `snapshot` for the configured proxy node.
    pub fn update(&self, snapshot: ConfigurationSnapshot) -> Result<Option<Arc<ResourceUpdate>>> {
        self.update_node(&self.node_id, snapshot)
    }

    /// Validate, encode and install `snapshot` for `node_id`, broadcasting
    /// the per-type changes. Returns `None` when the content is unchanged,
    /// in which case the previously installed snapshot stays in place.
    pub fn update_node(
        &self,
        node_id: &str,
        snapshot: ConfigurationSnapshot,
    ) -> Result<Option<Arc<ResourceUpdate>>> {
        snapshot.validate()?;
        let built = snapshot.build_resources()?;
        let version = snapshot.version;

        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let previous = snapshots.get(node_id).cloned();

        let mut next = NodeSnapshot { version: version.clone(), resources: BTreeMap::new() };
        let mut deltas = Vec::new();

        for type_url in SERVED_TYPE_URLS {
            let old = previous.as_ref().and_then(|p| p.resources.get(type_url));
            let mut by_name = BTreeMap::new();
            let mut delta = ResourceDelta { type_url: type_url.to_string(), ..Default::default() };

            for resource in built.get(type_url).into_iter().flatten() {
                let unchanged = old
                    .and_then(|o| o.get(&resource.name))
                    .filter(|cached| cached.body == resource.resource);

                let cached = match unchanged {
                    Some(cached) => cached.clone(),
                    None => {
                        let cached = CachedResource {
                            name: resource.name.clone(),
                            type_url: type_url.to_string(),
                            version: version.clone(),
                            body: resource.resource.clone(),
                        };
                        delta.added_or_updated.push(cached.clone());
                        cached
                    }
                };
                by_name.insert(resource.name.clone(), cached);
            }

            if let Some(old) = old {
                delta.removed =
                    old.keys().filter(|name| !by_name.contains_key(*name)).cloned().collect();
            }

            if !delta.is_empty() {
                deltas.push(delta);
            }
            next.resources.insert(type_url.to_string(), by_name);
        }

        if previous.is_some() && deltas.is_empty() {
            debug!(node_id = %node_id, version = %version, "Snapshot content unchanged, keeping installed version");
            return Ok(None);
        }

        snapshots.insert(node_id.to_string(), Arc::new(next));

        let update = Arc::new(ResourceUpdate { node_id: node_id.to_string(), version, deltas });
        info!(
            node_id = %node_id,
            version = %update.version,
            changed_types = update.deltas.len(),
            "Installed configuration snapshot"
        );
        // Sent under the write lock so receivers observe updates in install order.
        let _ = self.update_tx.send(update.clone());
        drop(snapshots);

        Ok(Some(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Exposure, ExposureId, Protocol};
    use crate::xds::resources::{CLUSTER_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL};
    use crate::xds::synthesizer::Synthesizer;
    use chrono::Utc;
    use std::collections::HashSet;

    fn exposure(id: &str, hostname: &str) -> Exposure {
        Exposure {
            id: ExposureId::from_string(id.to_string()),
            app_id: "web".to_string(),
            protocol: Protocol::Http,
            hostname: hostname.to_string(),
            container_port: 8080,
            host_port: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let state = XdsState::new("node");
        assert_eq!(state.next_version(), "1");
        assert_eq!(state.next_version(), "2");
        assert_eq!(state.current_version(), 2);
    }

    #[test]
    fn concurrent_versions_are_distinct_and_ordered_per_caller() {
        let state = Arc::new(XdsState::new("node"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| state.next_version().parse::<u64>().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let versions = handle.join().unwrap();
            assert!(versions.windows(2).all(|pair| pair[0] < pair[1]), "caller saw {versions:?}");
            for version in versions {
                assert!(seen.insert(version));
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(seen.iter().max().copied(), Some(2000));
        assert_eq!(state.current_version(), 2000);
    }

    #[tokio::test]
    async fn first_install_broadcasts_everything() {
        let state = XdsState::new("node");
        let mut rx = state.subscribe_updates();
        let snapshot = Synthesizer::default().build(&state.next_version(), &[exposure("exp_a", "web")]);

        let update = state.update(snapshot).unwrap().unwrap();
        let received = rx.recv().await.unwrap();

        assert_eq!(received.version, "1");
        assert_eq!(received.node_id, "node");
        assert!(update.touches(CLUSTER_TYPE_URL));
        assert!(update.touches(LISTENER_TYPE_URL));
        assert!(update.touches(ROUTE_TYPE_URL));

        let installed = state.snapshot("node").unwrap();
        assert_eq!(installed.version(), "1");
        assert_eq!(installed.resource_names(CLUSTER_TYPE_URL), vec!["cluster_exp_a".to_string()]);
        assert!(state.snapshot("other").is_none());
    }

    #[tokio::test]
    async fn unchanged_content_is_not_broadcast() {
        let state = XdsState::new("node");
        let synthesizer = Synthesizer::default();
        let exposures = vec![exposure("exp_a", "web")];
        state.update(synthesizer.build(&state.next_version(), &exposures)).unwrap();

        let mut rx = state.subscribe_updates();
        let result = state.update(synthesizer.build(&state.next_version(), &exposures)).unwrap();

        assert!(result.is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(state.snapshot("node").unwrap().version(), "1");
    }

    #[test]
    fn delta_only_carries_changed_resources() {
        let state = XdsState::new("node");
        let synthesizer = Synthesizer::default();
        state
            .update(synthesizer.build(&state.next_version(), &[exposure("exp_a", "web")]))
            .unwrap();

        let update = state
            .update(synthesizer.build(&state.next_version(), &[exposure("exp_a", "www")]))
            .unwrap()
            .unwrap();

        // Only the route table changes when a hostname changes.
        assert_eq!(update.deltas.len(), 1);
        let delta = update.delta_for(ROUTE_TYPE_URL).unwrap();
        assert_eq!(delta.added_or_updated.len(), 1);
        assert_eq!(delta.added_or_updated[0].version, "2");

        let installed = state.snapshot("node").unwrap();
        let cluster = &installed.resources(CLUSTER_TYPE_URL)[0];
        assert_eq!(cluster.version, "1");
    }

    #[test]
    fn removals_are_reported() {
        let state = XdsState::new("node");
        let synthesizer = Synthesizer::default();
        state
            .update(synthesizer.build(&state.next_version(), &[exposure("exp_a", "web")]))
            .unwrap();

        let update = state.update(synthesizer.build(&state.next_version(), &[])).unwrap().unwrap();
        assert_eq!(
            update.delta_for(CLUSTER_TYPE_URL).unwrap().removed,
            vec!["cluster_exp_a".to_string()]
        );
    }

    #[test]
    fn invalid_snapshot_is_rejected_and_not_installed() {
        let state = XdsState::new("node");
        let mut snapshot = Synthesizer::default().build("1", &[exposure("exp_a", "web")]);
        snapshot.clusters.clear();

        assert!(matches!(state.update(snapshot), Err(crate::Error::Validation(_))));
        assert!(state.snapshot("node").is_none());
    }

    #[test]
    fn named_lookup_skips_unknown_names() {
        let state = XdsState::new("node");
        state.update(Synthesizer::default().build("1", &[exposure("exp_a", "web")])).unwrap();
        let installed = state.snapshot("node").unwrap();

        let selected = installed.resources_named(
            ROUTE_TYPE_URL,
            &["http_routes".to_string(), "missing".to_string()],
        );
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "http_routes");
    }
}
