//! Translates the exposure collection into a proxy configuration snapshot.
//!
//! Synthesis is a pure function of `(version, exposures, settings)`: no I/O,
//! no clock, no randomness. Exposures are visited in `(created_at, id)`
//! order so the output never depends on collection iteration order.

use crate::config::ProxyConfig;
use crate::domain::Exposure;
use crate::xds::cluster::{
    ClusterConfig, ClusterDiscovery, EndpointConfig, LoadAssignmentConfig, LoadBalancingPolicy,
};
use crate::xds::listener::{ListenerConfig, ListenerFilter};
use crate::xds::route::{RouteActionConfig, RouteConfig, RouteRule, VirtualHostConfig};
use crate::xds::snapshot::ConfigurationSnapshot;

pub const HTTP_LISTENER_NAME: &str = "http_listener";
pub const HTTP_STAT_PREFIX: &str = "http";
pub const HTTP_ROUTE_CONFIG_NAME: &str = "http_routes";
pub const DEFAULT_VIRTUAL_HOST_NAME: &str = "default_backend";
pub const NOT_FOUND_BODY: &str = "No apps exposed\n";
pub const LISTEN_ADDRESS: &str = "0.0.0.0";

/// Proxy-side settings the synthesizer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerSettings {
    pub http_port: u16,
    pub container_suffix: String,
    pub connect_timeout_seconds: u64,
}

impl From<&ProxyConfig> for SynthesizerSettings {
    fn from(proxy: &ProxyConfig) -> Self {
        Self {
            http_port: proxy.http_port,
            container_suffix: proxy.container_suffix.clone(),
            connect_timeout_seconds: proxy.connect_timeout_seconds,
        }
    }
}

impl Default for SynthesizerSettings {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    settings: SynthesizerSettings,
}

impl Synthesizer {
    pub fn new(settings: SynthesizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SynthesizerSettings {
        &self.settings
    }

    /// Build the snapshot for `exposures` at `version`.
    pub fn build(&self, version: &str, exposures: &[Exposure]) -> ConfigurationSnapshot {
        let mut ordered: Vec<&Exposure> = exposures.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut snapshot = ConfigurationSnapshot::new(version);
        let mut virtual_hosts = Vec::new();

        for exposure in ordered.iter().filter(|e| e.is_http()) {
            virtual_hosts.push(VirtualHostConfig {
                name: exposure.virtual_host_name(),
                domains: exposure.domains(),
                routes: vec![RouteRule {
                    name: format!("route_{}", exposure.id),
                    prefix: "/".to_string(),
                    action: RouteActionConfig::Cluster { name: exposure.cluster_name() },
                }],
            });
            snapshot.clusters.push(self.cluster_for(exposure));
        }

        if virtual_hosts.is_empty() {
            virtual_hosts.push(default_virtual_host());
        }

        // The HTTP listener is always present so the port never refuses connections.
        snapshot.listeners.push(ListenerConfig {
            name: HTTP_LISTENER_NAME.to_string(),
            address: LISTEN_ADDRESS.to_string(),
            port: u32::from(self.settings.http_port),
            filter: ListenerFilter::HttpConnectionManager {
                stat_prefix: HTTP_STAT_PREFIX.to_string(),
                route_config_name: HTTP_ROUTE_CONFIG_NAME.to_string(),
            },
        });
        snapshot
            .routes
            .push(RouteConfig { name: HTTP_ROUTE_CONFIG_NAME.to_string(), virtual_hosts });

        for exposure in ordered.iter().filter(|e| e.is_tcp()) {
            snapshot.listeners.push(ListenerConfig {
                name: exposure.tcp_listener_name(),
                address: LISTEN_ADDRESS.to_string(),
                port: u32::from(exposure.host_port),
                filter: ListenerFilter::TcpProxy {
                    stat_prefix: exposure.tcp_stat_prefix(),
                    cluster: exposure.cluster_name(),
                },
            });
            snapshot.clusters.push(self.cluster_for(exposure));
        }

        snapshot
    }

    fn cluster_for(&self, exposure: &Exposure) -> ClusterConfig {
        let name = exposure.cluster_name();
        ClusterConfig {
            load_assignment: LoadAssignmentConfig {
                cluster_name: name.clone(),
                endpoints: vec![EndpointConfig {
                    address: format!("{}{}", exposure.app_id, self.settings.container_suffix),
                    port: u32::from(exposure.container_port),
                }],
            },
            name,
            discovery: ClusterDiscovery::StrictDns,
            load_balancing_policy: LoadBalancingPolicy::RoundRobin,
            connect_timeout_seconds: self.settings.connect_timeout_seconds,
        }
    }
}

fn default_virtual_host() -> VirtualHostConfig {
    VirtualHostConfig {
        name: DEFAULT_VIRTUAL_HOST_NAME.to_string(),
        domains: vec!["*".to_string()],
        routes: vec![RouteRule {
            name: "not_found".to_string(),
            prefix: "/".to_string(),
            action: RouteActionConfig::DirectResponse {
                status: 404,
                body: NOT_FOUND_BODY.to_string(),
            },
        }],
    }
}
