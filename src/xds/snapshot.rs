//! A complete, versioned proxy configuration as served to one node.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;

use crate::errors::{Error, Result};
use crate::xds::cluster::{ClusterConfig, LoadAssignmentConfig};
use crate::xds::listener::ListenerConfig;
use crate::xds::resources::{
    BuiltResource, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
};
use crate::xds::route::RouteConfig;

/// Listeners, route tables, clusters and endpoint assignments at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationSnapshot {
    pub version: String,
    pub listeners: Vec<ListenerConfig>,
    pub routes: Vec<RouteConfig>,
    pub clusters: Vec<ClusterConfig>,
    pub endpoints: Vec<LoadAssignmentConfig>,
}

impl ConfigurationSnapshot {
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into(), ..Default::default() }
    }

    /// Check the snapshot is self-consistent: names are unique per type and
    /// every cross-resource reference resolves.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::validation("snapshot version cannot be empty"));
        }

        unique_names("listener", self.listeners.iter().map(|l| l.name.as_str()))?;
        unique_names("route configuration", self.routes.iter().map(|r| r.name.as_str()))?;
        unique_names("cluster", self.clusters.iter().map(|c| c.name.as_str()))?;
        unique_names("endpoint assignment", self.endpoints.iter().map(|e| e.cluster_name.as_str()))?;

        let mut ports = HashSet::new();
        for listener in &self.listeners {
            if !ports.insert((listener.address.as_str(), listener.port)) {
                return Err(Error::validation(format!(
                    "listener '{}' reuses {}:{}",
                    listener.name, listener.address, listener.port
                )));
            }
        }

        for route in &self.routes {
            let mut domains = HashSet::new();
            for vhost in &route.virtual_hosts {
                if let Some(domain) = vhost.domains.iter().find(|d| !domains.insert(d.as_str())) {
                    return Err(Error::validation(format!(
                        "route configuration '{}' lists domain '{}' in more than one virtual host (again in '{}')",
                        route.name, domain, vhost.name
                    )));
                }
            }
        }

        let clusters: BTreeSet<&str> = self.clusters.iter().map(|c| c.name.as_str()).collect();
        let routes: BTreeSet<&str> = self.routes.iter().map(|r| r.name.as_str()).collect();

        for listener in &self.listeners {
            if let Some(route_name) = listener.filter.route_config_name() {
                if !routes.contains(route_name) {
                    return Err(Error::validation(format!(
                        "listener '{}' references unknown route configuration '{}'",
                        listener.name, route_name
                    )));
                }
            }
            if let Some(cluster) = listener.filter.cluster_name() {
                if !clusters.contains(cluster) {
                    return Err(Error::validation(format!(
                        "listener '{}' references unknown cluster '{}'",
                        listener.name, cluster
                    )));
                }
            }
        }

        for route in &self.routes {
            if let Some(missing) =
                route.referenced_clusters().into_iter().find(|name| !clusters.contains(name))
            {
                return Err(Error::validation(format!(
                    "route configuration '{}' references unknown cluster '{}'",
                    route.name, missing
                )));
            }
        }

        for assignment in &self.endpoints {
            if !clusters.contains(assignment.cluster_name.as_str()) {
                return Err(Error::validation(format!(
                    "endpoint assignment references unknown cluster '{}'",
                    assignment.cluster_name
                )));
            }
        }

        Ok(())
    }

    /// Encode every resource, grouped by type URL. All served types are
    /// present, even when empty.
    pub fn build_resources(&self) -> Result<BTreeMap<&'static str, Vec<BuiltResource>>> {
        let mut built: BTreeMap<&'static str, Vec<BuiltResource>> = BTreeMap::new();

        let clusters = self
            .clusters
            .iter()
            .map(|c| Ok(BuiltResource::encode(&c.name, CLUSTER_TYPE_URL, &c.to_envoy_cluster()?)))
            .collect::<Result<Vec<_>>>()?;
        built.insert(CLUSTER_TYPE_URL, clusters);

        let endpoints = self
            .endpoints
            .iter()
            .map(|e| {
                let assignment: ClusterLoadAssignment = e.to_envoy_load_assignment()?;
                Ok(BuiltResource::encode(&e.cluster_name, ENDPOINT_TYPE_URL, &assignment))
            })
            .collect::<Result<Vec<_>>>()?;
        built.insert(ENDPOINT_TYPE_URL, endpoints);

        let listeners = self
            .listeners
            .iter()
            .map(|l| Ok(BuiltResource::encode(&l.name, LISTENER_TYPE_URL, &l.to_envoy_listener()?)))
            .collect::<Result<Vec<_>>>()?;
        built.insert(LISTENER_TYPE_URL, listeners);

        let routes = self
            .routes
            .iter()
            .map(|r| {
                Ok(BuiltResource::encode(&r.name, ROUTE_TYPE_URL, &r.to_envoy_route_configuration()?))
            })
            .collect::<Result<Vec<_>>>()?;
        built.insert(ROUTE_TYPE_URL, routes);

        Ok(built)
    }

    /// Resource names of one type, in snapshot order.
    pub fn resource_names(&self, type_url: &str) -> Vec<&str> {
        match type_url {
            CLUSTER_TYPE_URL => self.clusters.iter().map(|c| c.name.as_str()).collect(),
            ENDPOINT_TYPE_URL => self.endpoints.iter().map(|e| e.cluster_name.as_str()).collect(),
            LISTENER_TYPE_URL => self.listeners.iter().map(|l| l.name.as_str()).collect(),
            ROUTE_TYPE_URL => self.routes.iter().map(|r| r.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn unique_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::validation(format!("duplicate {} name '{}'", kind, name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::cluster::{ClusterDiscovery, EndpointConfig, LoadBalancingPolicy};
    use crate::xds::listener::ListenerFilter;
    use crate::xds::route::{RouteActionConfig, RouteRule, VirtualHostConfig};

    fn cluster(name: &str) -> ClusterConfig {
        ClusterConfig {
            name: name.to_string(),
            discovery: ClusterDiscovery::StrictDns,
            load_balancing_policy: LoadBalancingPolicy::RoundRobin,
            connect_timeout_seconds: 5,
            load_assignment: LoadAssignmentConfig {
                cluster_name: name.to_string(),
                endpoints: vec![EndpointConfig { address: "web-main".to_string(), port: 8080 }],
            },
        }
    }

    fn snapshot() -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            version: "1".to_string(),
            listeners: vec![
                ListenerConfig {
                    name: "http_listener".to_string(),
                    address: "0.0.0.0".to_string(),
                    port: 80,
                    filter: ListenerFilter::HttpConnectionManager {
                        stat_prefix: "http".to_string(),
                        route_config_name: "http_routes".to_string(),
                    },
                },
                ListenerConfig {
                    name: "tcp_listener_b".to_string(),
                    address: "0.0.0.0".to_string(),
                    port: 10000,
                    filter: ListenerFilter::TcpProxy {
                        stat_prefix: "tcp_b".to_string(),
                        cluster: "cluster_b".to_string(),
                    },
                },
            ],
            routes: vec![RouteConfig {
                name: "http_routes".to_string(),
                virtual_hosts: vec![VirtualHostConfig {
                    name: "vhost_a".to_string(),
                    domains: vec!["a".to_string()],
                    routes: vec![RouteRule {
                        name: "route_a".to_string(),
                        prefix: "/".to_string(),
                        action: RouteActionConfig::Cluster { name: "cluster_a".to_string() },
                    }],
                }],
            }],
            clusters: vec![cluster("cluster_a"), cluster("cluster_b")],
            endpoints: Vec::new(),
        }
    }

    #[test]
    fn consistent_snapshot_validates_and_builds() {
        let snapshot = snapshot();
        snapshot.validate().unwrap();

        let built = snapshot.build_resources().unwrap();
        assert_eq!(built.len(), 4);
        assert_eq!(built[CLUSTER_TYPE_URL].len(), 2);
        assert_eq!(built[LISTENER_TYPE_URL].len(), 2);
        assert_eq!(built[ROUTE_TYPE_URL].len(), 1);
        assert!(built[ENDPOINT_TYPE_URL].is_empty());
        assert!(built[LISTENER_TYPE_URL].iter().all(|r| r.type_url() == LISTENER_TYPE_URL));
    }

    #[test]
    fn dangling_route_cluster_is_rejected() {
        let mut snapshot = snapshot();
        snapshot.clusters.retain(|c| c.name != "cluster_a");
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("cluster_a"));
    }

    #[test]
    fn dangling_listener_route_is_rejected() {
        let mut snapshot = snapshot();
        snapshot.routes.clear();
        assert!(matches!(snapshot.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn duplicate_names_and_ports_are_rejected() {
        let mut duplicate_cluster = snapshot();
        duplicate_cluster.clusters.push(cluster("cluster_a"));
        assert!(duplicate_cluster.validate().is_err());

        let mut duplicate_port = snapshot();
        duplicate_port.listeners[1].port = 80;
        assert!(duplicate_port.validate().is_err());
    }

    #[test]
    fn domain_shared_by_two_virtual_hosts_is_rejected() {
        let mut snapshot = snapshot();
        let mut alias = snapshot.routes[0].virtual_hosts[0].clone();
        alias.name = "vhost_c".to_string();
        alias.domains = vec!["c".to_string(), "a".to_string()];
        snapshot.routes[0].virtual_hosts.push(alias);

        let err = snapshot.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn empty_version_is_rejected() {
        let mut snapshot = snapshot();
        snapshot.version.clear();
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn resource_names_follow_snapshot_order() {
        let snapshot = snapshot();
        assert_eq!(snapshot.resource_names(CLUSTER_TYPE_URL), vec!["cluster_a", "cluster_b"]);
        assert!(snapshot.resource_names("type.googleapis.com/unknown").is_empty());
    }
}
