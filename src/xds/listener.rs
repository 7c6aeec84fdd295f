//! Listener IR and conversion into envoy-types listeners.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, config_source::ConfigSourceSpecifier, socket_address,
    Address, AggregatedConfigSource, ConfigSource, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{filter, Filter, FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    http_filter, HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier, TcpProxy,
};
use serde::{Deserialize, Serialize};

use crate::xds::resources::{
    to_any, HTTP_CONNECTION_MANAGER_FILTER_NAME, HTTP_CONNECTION_MANAGER_TYPE_URL,
    ROUTER_FILTER_NAME, ROUTER_TYPE_URL, TCP_PROXY_FILTER_NAME, TCP_PROXY_TYPE_URL,
};

/// Listener served over LDS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,
    pub address: String,
    pub port: u32,
    pub filter: ListenerFilter,
}

/// The single network filter of a listener's filter chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ListenerFilter {
    /// HTTP connection manager whose routes are fetched over RDS through ADS
    HttpConnectionManager { stat_prefix: String, route_config_name: String },
    TcpProxy { stat_prefix: String, cluster: String },
}

impl ListenerConfig {
    /// Convert ListenerConfig to envoy-types Listener
    pub fn to_envoy_listener(&self) -> Result<Listener, crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::validation("listener name cannot be empty"));
        }
        if self.port == 0 || self.port > u32::from(u16::MAX) {
            return Err(crate::Error::validation(format!(
                "listener '{}' has invalid port {}",
                self.name, self.port
            )));
        }

        let address = Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                address: self.address.clone(),
                port_specifier: Some(socket_address::PortSpecifier::PortValue(self.port)),
                ..Default::default()
            })),
        };

        Ok(Listener {
            name: self.name.clone(),
            address: Some(address),
            filter_chains: vec![FilterChain {
                filters: vec![self.filter.to_envoy_filter()],
                ..Default::default()
            }],
            ..Default::default()
        })
    }
}

impl ListenerFilter {
    fn to_envoy_filter(&self) -> Filter {
        match self {
            ListenerFilter::HttpConnectionManager { stat_prefix, route_config_name } => {
                let router = HttpFilter {
                    name: ROUTER_FILTER_NAME.to_string(),
                    config_type: Some(http_filter::ConfigType::TypedConfig(to_any(
                        ROUTER_TYPE_URL,
                        &Router::default(),
                    ))),
                    ..Default::default()
                };

                let manager = HttpConnectionManager {
                    stat_prefix: stat_prefix.clone(),
                    codec_type: CodecType::Auto as i32,
                    route_specifier: Some(RouteSpecifier::Rds(Rds {
                        route_config_name: route_config_name.clone(),
                        config_source: Some(ConfigSource {
                            config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                                AggregatedConfigSource::default(),
                            )),
                            ..Default::default()
                        }),
                    })),
                    http_filters: vec![router],
                    ..Default::default()
                };

                Filter {
                    name: HTTP_CONNECTION_MANAGER_FILTER_NAME.to_string(),
                    config_type: Some(filter::ConfigType::TypedConfig(to_any(
                        HTTP_CONNECTION_MANAGER_TYPE_URL,
                        &manager,
                    ))),
                }
            }
            ListenerFilter::TcpProxy { stat_prefix, cluster } => {
                let proxy = TcpProxy {
                    stat_prefix: stat_prefix.clone(),
                    cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.clone())),
                    ..Default::default()
                };

                Filter {
                    name: TCP_PROXY_FILTER_NAME.to_string(),
                    config_type: Some(filter::ConfigType::TypedConfig(to_any(
                        TCP_PROXY_TYPE_URL,
                        &proxy,
                    ))),
                }
            }
        }
    }

    /// Route table an HTTP listener depends on.
    pub fn route_config_name(&self) -> Option<&str> {
        match self {
            ListenerFilter::HttpConnectionManager { route_config_name, .. } => {
                Some(route_config_name)
            }
            ListenerFilter::TcpProxy { .. } => None,
        }
    }

    /// Cluster a TCP listener forwards to.
    pub fn cluster_name(&self) -> Option<&str> {
        match self {
            ListenerFilter::TcpProxy { cluster, .. } => Some(cluster),
            ListenerFilter::HttpConnectionManager { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn typed_config(listener: &Listener) -> &envoy_types::pb::google::protobuf::Any {
        match &listener.filter_chains[0].filters[0].config_type {
            Some(filter::ConfigType::TypedConfig(any)) => any,
            other => panic!("unexpected config type {:?}", other),
        }
    }

    #[test]
    fn http_listener_uses_rds_over_ads() {
        let config = ListenerConfig {
            name: "http_listener".to_string(),
            address: "0.0.0.0".to_string(),
            port: 80,
            filter: ListenerFilter::HttpConnectionManager {
                stat_prefix: "http".to_string(),
                route_config_name: "http_routes".to_string(),
            },
        };

        let listener = config.to_envoy_listener().unwrap();
        let any = typed_config(&listener);
        assert_eq!(any.type_url, HTTP_CONNECTION_MANAGER_TYPE_URL);

        let manager = HttpConnectionManager::decode(any.value.as_slice()).unwrap();
        assert_eq!(manager.stat_prefix, "http");
        assert_eq!(manager.http_filters[0].name, ROUTER_FILTER_NAME);
        match manager.route_specifier {
            Some(RouteSpecifier::Rds(rds)) => {
                assert_eq!(rds.route_config_name, "http_routes");
                assert!(matches!(
                    rds.config_source.and_then(|s| s.config_source_specifier),
                    Some(ConfigSourceSpecifier::Ads(_))
                ));
            }
            other => panic!("unexpected route specifier {:?}", other),
        }
    }

    #[test]
    fn tcp_listener_proxies_to_cluster() {
        let config = ListenerConfig {
            name: "tcp_listener_exp_1".to_string(),
            address: "0.0.0.0".to_string(),
            port: 10000,
            filter: ListenerFilter::TcpProxy {
                stat_prefix: "tcp_exp_1".to_string(),
                cluster: "cluster_exp_1".to_string(),
            },
        };

        let listener = config.to_envoy_listener().unwrap();
        let proxy = TcpProxy::decode(typed_config(&listener).value.as_slice()).unwrap();
        assert_eq!(proxy.stat_prefix, "tcp_exp_1");
        assert_eq!(
            proxy.cluster_specifier,
            Some(ClusterSpecifier::Cluster("cluster_exp_1".to_string()))
        );
        assert_eq!(config.filter.cluster_name(), Some("cluster_exp_1"));
        assert_eq!(config.filter.route_config_name(), None);
    }

    #[test]
    fn port_zero_is_rejected() {
        let config = ListenerConfig {
            name: "bad".to_string(),
            address: "0.0.0.0".to_string(),
            port: 0,
            filter: ListenerFilter::TcpProxy {
                stat_prefix: "tcp".to_string(),
                cluster: "c".to_string(),
            },
        };
        assert!(config.to_envoy_listener().is_err());
    }
}
