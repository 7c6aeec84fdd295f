//! # Exposure Registry
//!
//! Owns the exposure collection. Every mutation runs under one write lock and
//! is split in two phases: commit (in memory and on disk, rolled back together
//! on failure) and publish (synthesize a snapshot and hand it to the discovery
//! server). A failed publish leaves the registry dirty; [`ExposureRegistry::republish`]
//! and the background loop retry it.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::{
    hostname_domains, normalize_hostname, ContainerStatus, Exposure, ExposureId, Protocol,
};
use crate::errors::{Error, Result};
use crate::network::NetworkReconciler;
use crate::observability::metrics;
use crate::runtime::{with_deadline, SharedRuntime};
use crate::utils::{APP_ID_REGEX, HOSTNAME_REGEX};
use crate::xds::{Synthesizer, SynthesizerSettings, XdsState};

pub mod ports;
pub mod store;

pub use ports::PortAllocator;
pub use store::{ExposureMap, ExposureStore};

/// Input of [`ExposureRegistry::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExposure {
    pub app_id: String,
    pub protocol: Protocol,
    pub hostname: String,
    pub container_port: u32,
}

impl NewExposure {
    pub fn http(app_id: impl Into<String>, hostname: impl Into<String>, container_port: u32) -> Self {
        Self {
            app_id: app_id.into(),
            protocol: Protocol::Http,
            hostname: hostname.into(),
            container_port,
        }
    }

    pub fn tcp(app_id: impl Into<String>, container_port: u32) -> Self {
        Self {
            app_id: app_id.into(),
            protocol: Protocol::Tcp,
            hostname: String::new(),
            container_port,
        }
    }
}

/// Validated form of [`NewExposure`]
#[derive(Debug)]
struct ExposureKey {
    app_id: String,
    protocol: Protocol,
    hostname: String,
    container_port: u16,
}

impl ExposureKey {
    fn validate(request: NewExposure) -> Result<Self> {
        let app_id = request.app_id.trim().to_string();
        if !APP_ID_REGEX.is_match(&app_id) {
            return Err(Error::validation(format!(
                "app_id '{}' must be non-empty and contain only letters, digits, '_', '.' or '-'",
                request.app_id
            )));
        }

        let container_port = match u16::try_from(request.container_port) {
            Ok(port) if port > 0 => port,
            _ => {
                return Err(Error::validation(format!(
                    "container_port must be between 1 and 65535, got {}",
                    request.container_port
                )))
            }
        };

        let hostname = match request.protocol {
            Protocol::Http => {
                let hostname = normalize_hostname(&request.hostname);
                if hostname.is_empty() {
                    return Err(Error::validation("hostname is required for http exposures"));
                }
                if !HOSTNAME_REGEX.is_match(&hostname) {
                    return Err(Error::validation(format!(
                        "hostname '{}' is not a valid host name",
                        request.hostname
                    )));
                }
                hostname
            }
            Protocol::Tcp => String::new(),
        };

        Ok(Self { app_id, protocol: request.protocol, hostname, container_port })
    }
}

#[derive(Debug)]
struct RegistryInner {
    exposures: Arc<RwLock<ExposureMap>>,
    store: ExposureStore,
    allocator: PortAllocator,
    reconciler: NetworkReconciler,
    runtime: SharedRuntime,
    runtime_timeout: Duration,
    container_suffix: String,
    synthesizer: Synthesizer,
    xds: Arc<XdsState>,
    dirty: AtomicBool,
}

/// Cheaply cloneable handle to the exposure registry
#[derive(Debug, Clone)]
pub struct ExposureRegistry {
    inner: Arc<RegistryInner>,
}

impl ExposureRegistry {
    /// Load persisted exposures, reconcile their networks and publish the
    /// initial snapshot. A corrupt state file or a failed initial publish
    /// aborts startup.
    #[instrument(skip_all, fields(state_dir = %config.registry.state_dir))]
    pub async fn open(config: &AppConfig, runtime: SharedRuntime, xds: Arc<XdsState>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.registry.state_dir).await.map_err(|e| {
            Error::persistence(format!(
                "failed to create state directory {}: {}",
                config.registry.state_dir, e
            ))
        })?;

        let store = ExposureStore::new(config.registry.state_file());
        let exposures = store.load().await?;
        info!(path = %store.path().display(), exposures = exposures.len(), "Loaded persisted exposures");

        let runtime_timeout = config.runtime.timeout();
        let registry = Self {
            inner: Arc::new(RegistryInner {
                exposures: Arc::new(RwLock::new(exposures)),
                store,
                allocator: PortAllocator::new(config.registry.port_range()),
                reconciler: NetworkReconciler::new(
                    runtime.clone(),
                    config.proxy.network_name.clone(),
                    runtime_timeout,
                ),
                runtime,
                runtime_timeout,
                container_suffix: config.proxy.container_suffix.clone(),
                synthesizer: Synthesizer::new(SynthesizerSettings::from(&config.proxy)),
                xds,
                dirty: AtomicBool::new(false),
            }),
        };

        let exposures = registry.inner.exposures.read().await;
        registry.reconcile_networks(&exposures).await;
        registry.inner.publish(&exposures).await?;
        registry.inner.record_counts(&exposures).await;
        drop(exposures);

        Ok(registry)
    }

    /// Container name the proxy uses to reach `app_id`
    pub fn container_name(&self, app_id: &str) -> String {
        format!("{}{}", app_id, self.inner.container_suffix)
    }

    /// Create an exposure, or return the existing one with the same
    /// (app_id, protocol, hostname, container_port). The flag reports whether
    /// a new record was created.
    #[instrument(skip(self), fields(app_id = %request.app_id, protocol = %request.protocol))]
    pub async fn create(&self, request: NewExposure) -> Result<(Exposure, bool)> {
        let result = self.create_inner(request).await;
        metrics::record_exposure_operation("create", result.is_ok()).await;
        result
    }

    async fn create_inner(&self, request: NewExposure) -> Result<(Exposure, bool)> {
        let key = ExposureKey::validate(request)?;
        let mut exposures = self.inner.exposures.clone().write_owned().await;

        if let Some(existing) = exposures.values().find(|e| {
            e.matches_key(&key.app_id, key.protocol, &key.hostname, key.container_port)
        }) {
            debug!(exposure_id = %existing.id, "Exposure already exists");
            return Ok((existing.clone(), false));
        }

        if key.protocol == Protocol::Http {
            let claimed = hostname_domains(&key.hostname);
            let overlap = exposures.values().filter(|e| e.is_http()).find_map(|e| {
                e.domains().into_iter().find(|d| claimed.contains(d)).map(|d| (e, d))
            });
            if let Some((owner, domain)) = overlap {
                return Err(Error::conflict(format!(
                    "domain '{}' is already served by {} (app '{}', hostname '{}')",
                    domain, owner.id, owner.app_id, owner.hostname
                )));
            }
        }

        let container = self.container_name(&key.app_id);
        let found = with_deadline(
            self.inner.runtime_timeout,
            "container inspect",
            self.inner.runtime.inspect_container(&container),
        )
        .await?;
        if found.is_none() {
            return Err(Error::not_found(format!(
                "container '{}' for app '{}' not found",
                container, key.app_id
            )));
        }

        let host_port = match key.protocol {
            Protocol::Tcp => {
                let taken: BTreeSet<u16> =
                    exposures.values().filter(|e| e.is_tcp()).map(|e| e.host_port).collect();
                self.inner.allocator.allocate(&taken)?
            }
            Protocol::Http => 0,
        };

        self.inner.reconciler.attach(&container).await?;

        let exposure = Exposure {
            id: ExposureId::generate(),
            app_id: key.app_id,
            protocol: key.protocol,
            hostname: key.hostname,
            container_port: key.container_port,
            host_port,
            created_at: Utc::now(),
        };

        let previous = exposures.clone();
        exposures.insert(exposure.id.clone(), exposure.clone());
        info!(exposure_id = %exposure.id, host_port = exposure.host_port, "Exposure created");

        self.commit(exposures, previous).await?;
        Ok((exposure, true))
    }

    /// Look up one exposure by id.
    pub async fn get(&self, id: &ExposureId) -> Result<Exposure> {
        self.inner
            .exposures
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("exposure '{}' not found", id)))
    }

    /// Earliest exposure of `app_id`.
    pub async fn get_by_app(&self, app_id: &str) -> Result<Exposure> {
        self.list_by_app(app_id)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("no exposure for app '{}'", app_id)))
    }

    /// Exposures of `app_id`, oldest first.
    pub async fn list_by_app(&self, app_id: &str) -> Vec<Exposure> {
        let mut matching: Vec<Exposure> = self
            .inner
            .exposures
            .read()
            .await
            .values()
            .filter(|e| e.app_id == app_id)
            .cloned()
            .collect();
        sort_by_creation(&mut matching);
        matching
    }

    /// Every exposure, oldest first.
    pub async fn list(&self) -> Vec<Exposure> {
        let mut all: Vec<Exposure> = self.inner.exposures.read().await.values().cloned().collect();
        sort_by_creation(&mut all);
        all
    }

    #[instrument(skip(self), fields(exposure_id = %id))]
    pub async fn delete(&self, id: &ExposureId) -> Result<Exposure> {
        let result = async {
            let mut exposures = self.inner.exposures.clone().write_owned().await;
            let previous = exposures.clone();
            let removed = exposures
                .remove(id)
                .ok_or_else(|| Error::not_found(format!("exposure '{}' not found", id)))?;
            info!(app_id = %removed.app_id, "Exposure deleted");

            self.commit(exposures, previous).await?;
            Ok(removed)
        }
        .await;

        metrics::record_exposure_operation("delete", result.is_ok()).await;
        result
    }

    /// Remove every exposure of `app_id` and return the removed records.
    #[instrument(skip(self))]
    pub async fn delete_by_app(&self, app_id: &str) -> Result<Vec<Exposure>> {
        let result = async {
            let mut exposures = self.inner.exposures.clone().write_owned().await;
            let previous = exposures.clone();

            let ids: Vec<ExposureId> = exposures
                .values()
                .filter(|e| e.app_id == app_id)
                .map(|e| e.id.clone())
                .collect();
            if ids.is_empty() {
                return Err(Error::not_found(format!("no exposure for app '{}'", app_id)));
            }

            let mut removed: Vec<Exposure> =
                ids.iter().filter_map(|id| exposures.remove(id)).collect();
            sort_by_creation(&mut removed);
            info!(removed = removed.len(), "Exposures deleted for app");

            self.commit(exposures, previous).await?;
            Ok(removed)
        }
        .await;

        metrics::record_exposure_operation("delete_by_app", result.is_ok()).await;
        result
    }

    /// Live status of the app's container. Lookup failures count as unavailable.
    pub async fn container_status(&self, app_id: &str) -> ContainerStatus {
        let container = self.container_name(app_id);
        let inspected = with_deadline(
            self.inner.runtime_timeout,
            "container inspect",
            self.inner.runtime.inspect_container(&container),
        )
        .await;

        match inspected {
            Ok(Some(info)) if info.is_running() => ContainerStatus::Available,
            Ok(_) => ContainerStatus::Unavailable,
            Err(e) => {
                debug!(container = %container, error = %e, "Container status lookup failed");
                ContainerStatus::Unavailable
            }
        }
    }

    /// Whether the last publish failed and has not been retried successfully
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Synthesize and publish a snapshot of the current collection, returning
    /// the version it was tagged with.
    #[instrument(skip(self))]
    pub async fn republish(&self) -> Result<String> {
        let exposures = self.inner.exposures.read().await;
        self.inner.publish(&exposures).await
    }

    /// Retry dirty publishes every `interval` until `shutdown` resolves.
    pub async fn run_republish_loop<F>(&self, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "Republish loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Republish loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if self.is_dirty() {
                        match self.republish().await {
                            Ok(version) => info!(version = %version, "Pending snapshot republished"),
                            Err(e) => warn!(error = %e, "Republish attempt failed"),
                        }
                    }
                }
            }
        }
    }

    /// Persist the mutated collection, then publish it. Runs in its own task
    /// so a cancelled caller cannot leave memory and disk out of step.
    async fn commit(
        &self,
        mut exposures: OwnedRwLockWriteGuard<ExposureMap>,
        previous: ExposureMap,
    ) -> Result<()> {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = inner.store.save(&exposures).await {
                warn!(error = %e, "Persisting exposures failed, rolling back");
                *exposures = previous;
                return Err(e);
            }

            if let Err(e) = inner.publish(&exposures).await {
                warn!(error = %e, "Exposure committed but snapshot publish failed");
            }
            inner.record_counts(&exposures).await;
            Ok(())
        });

        task.await.map_err(|e| Error::internal(format!("exposure commit task failed: {}", e)))?
    }

    async fn reconcile_networks(&self, exposures: &ExposureMap) {
        let apps: HashSet<&str> = exposures.values().map(|e| e.app_id.as_str()).collect();
        for app_id in apps {
            let container = self.container_name(app_id);
            if let Err(e) = self.inner.reconciler.attach(&container).await {
                warn!(app_id = %app_id, container = %container, error = %e, "Network reconciliation failed");
            }
        }
    }
}

impl RegistryInner {
    async fn publish(&self, exposures: &ExposureMap) -> Result<String> {
        let list: Vec<Exposure> = exposures.values().cloned().collect();
        let version = self.xds.next_version();
        let snapshot = self.synthesizer.build(&version, &list);

        match self.xds.update(snapshot) {
            Ok(update) => {
                self.dirty.store(false, Ordering::SeqCst);
                let result = if update.is_some() { "published" } else { "unchanged" };
                info!(version = %version, exposures = list.len(), result, "Snapshot published");
                metrics::record_snapshot_publish(result, version.parse().ok()).await;
                Ok(version)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                warn!(version = %version, error = %e, "Snapshot publish failed");
                metrics::record_snapshot_publish("failed", None).await;
                Err(e)
            }
        }
    }

    async fn record_counts(&self, exposures: &ExposureMap) {
        let http = exposures.values().filter(|e| e.is_http()).count();
        metrics::set_exposure_counts(http, exposures.len() - http).await;
    }
}

fn sort_by_creation(exposures: &mut [Exposure]) {
    exposures.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
