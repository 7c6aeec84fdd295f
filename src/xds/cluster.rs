//! Cluster IR and conversion into envoy-types clusters.

use envoy_types::pb::envoy::config::{
    cluster::v3::{
        cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy},
        Cluster,
    },
    core::v3::{address::Address as AddressType, socket_address, Address, SocketAddress},
    endpoint::v3::{lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints},
};
use envoy_types::pb::google::protobuf::Duration;
use serde::{Deserialize, Serialize};

/// Upstream cluster definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub discovery: ClusterDiscovery,
    pub load_balancing_policy: LoadBalancingPolicy,
    pub connect_timeout_seconds: u64,
    pub load_assignment: LoadAssignmentConfig,
}

/// How Envoy resolves the cluster's endpoint addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterDiscovery {
    Static,
    StrictDns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingPolicy {
    RoundRobin,
    LeastRequest,
}

/// Endpoints of one cluster, served inline or through EDS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadAssignmentConfig {
    pub cluster_name: String,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub address: String,
    pub port: u32,
}

impl ClusterConfig {
    /// Convert ClusterConfig to envoy-types Cluster
    pub fn to_envoy_cluster(&self) -> Result<Cluster, crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::validation("cluster name cannot be empty"));
        }

        Ok(Cluster {
            name: self.name.clone(),
            cluster_discovery_type: Some(ClusterDiscoveryType::Type(
                self.discovery.to_envoy_discovery_type() as i32,
            )),
            lb_policy: self.load_balancing_policy.to_envoy_lb_policy() as i32,
            connect_timeout: Some(Duration {
                seconds: self.connect_timeout_seconds as i64,
                nanos: 0,
            }),
            load_assignment: Some(self.load_assignment.to_envoy_load_assignment()?),
            ..Default::default()
        })
    }
}

impl ClusterDiscovery {
    fn to_envoy_discovery_type(self) -> DiscoveryType {
        match self {
            ClusterDiscovery::Static => DiscoveryType::Static,
            ClusterDiscovery::StrictDns => DiscoveryType::StrictDns,
        }
    }
}

impl LoadBalancingPolicy {
    fn to_envoy_lb_policy(self) -> LbPolicy {
        match self {
            LoadBalancingPolicy::RoundRobin => LbPolicy::RoundRobin,
            LoadBalancingPolicy::LeastRequest => LbPolicy::LeastRequest,
        }
    }
}

impl LoadAssignmentConfig {
    pub fn to_envoy_load_assignment(&self) -> Result<ClusterLoadAssignment, crate::Error> {
        let lb_endpoints = self
            .endpoints
            .iter()
            .map(EndpointConfig::to_envoy_lb_endpoint)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClusterLoadAssignment {
            cluster_name: self.cluster_name.clone(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
            ..Default::default()
        })
    }
}

impl EndpointConfig {
    fn to_envoy_lb_endpoint(&self) -> Result<LbEndpoint, crate::Error> {
        if self.address.is_empty() || self.port == 0 || self.port > u32::from(u16::MAX) {
            return Err(crate::Error::validation(format!(
                "invalid endpoint {}:{}",
                self.address, self.port
            )));
        }

        let socket_address = SocketAddress {
            address: self.address.clone(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(self.port)),
            ..Default::default()
        };

        let endpoint = Endpoint {
            address: Some(Address { address: Some(AddressType::SocketAddress(socket_address)) }),
            ..Default::default()
        };

        Ok(LbEndpoint {
            host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)),
            ..Default::default()
        })
    }
}
