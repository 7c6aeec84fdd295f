//! Envoy bootstrap document.
//!
//! The proxy starts from a static bootstrap that only knows how to reach the
//! discovery server; listeners and clusters then arrive over ADS.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::IntoParams;

use crate::config::AppConfig;
use crate::errors::{Error, Result};

/// Name of the static cluster pointing at the discovery server
pub const XDS_CLUSTER_NAME: &str = "xds_cluster";

/// Inputs of [`render_bootstrap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapParams {
    pub node_id: String,
    pub node_cluster: String,
    pub xds_host: String,
    pub xds_port: u16,
    pub admin_port: u16,
}

impl BootstrapParams {
    /// Parameters for the running configuration. A wildcard bind address is
    /// not reachable, so it is advertised as loopback.
    pub fn from_config(config: &AppConfig) -> Self {
        let xds_host = match config.xds.bind_address.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1".to_string(),
            other => other.to_string(),
        };

        Self {
            node_id: config.proxy.node_id.clone(),
            node_cluster: config.proxy.node_cluster.clone(),
            xds_host,
            xds_port: config.xds.port,
            admin_port: config.proxy.admin_port,
        }
    }

    /// Apply optional overrides of the discovery server address.
    pub fn with_xds_address(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.xds_host = host;
        }
        if let Some(port) = port {
            self.xds_port = port;
        }
        self
    }
}

/// Query parameters accepted by the bootstrap endpoint
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BootstrapQuery {
    /// Discovery server host the proxy should dial
    pub xds_host: Option<String>,
    /// Discovery server port the proxy should dial
    pub xds_port: Option<u16>,
}

/// Envoy bootstrap as a JSON value.
pub fn bootstrap_value(params: &BootstrapParams) -> Value {
    json!({
        "node": {
            "id": params.node_id,
            "cluster": params.node_cluster,
        },
        "dynamic_resources": {
            "ads_config": {
                "api_type": "GRPC",
                "transport_api_version": "V3",
                "grpc_services": [
                    { "envoy_grpc": { "cluster_name": XDS_CLUSTER_NAME } }
                ]
            },
            "lds_config": { "resource_api_version": "V3", "ads": {} },
            "cds_config": { "resource_api_version": "V3", "ads": {} },
        },
        "static_resources": {
            "clusters": [
                {
                    "name": XDS_CLUSTER_NAME,
                    "type": "STATIC",
                    "connect_timeout": "1s",
                    "typed_extension_protocol_options": {
                        "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                            "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                            "explicit_http_config": { "http2_protocol_options": {} }
                        }
                    },
                    "load_assignment": {
                        "cluster_name": XDS_CLUSTER_NAME,
                        "endpoints": [
                            {
                                "lb_endpoints": [
                                    {
                                        "endpoint": {
                                            "address": {
                                                "socket_address": {
                                                    "address": params.xds_host,
                                                    "port_value": params.xds_port
                                                }
                                            }
                                        }
                                    }
                                ]
                            }
                        ]
                    }
                }
            ]
        },
        "admin": {
            "address": {
                "socket_address": {
                    "address": "0.0.0.0",
                    "port_value": params.admin_port
                }
            }
        }
    })
}

/// Render the Envoy bootstrap YAML for `params`.
pub fn render_bootstrap(params: &BootstrapParams) -> Result<String> {
    if params.node_id.is_empty() {
        return Err(Error::validation("bootstrap node id cannot be empty"));
    }
    if params.xds_host.is_empty() || params.xds_port == 0 {
        return Err(Error::validation("bootstrap needs a discovery server host and port"));
    }

    serde_yaml::to_string(&bootstrap_value(params))
        .map_err(|e| Error::internal(format!("failed to render bootstrap: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BootstrapParams {
        BootstrapParams {
            node_id: "zeropoint-node".to_string(),
            node_cluster: "zeropoint-cluster".to_string(),
            xds_host: "10.0.0.5".to_string(),
            xds_port: 18000,
            admin_port: 9901,
        }
    }

    #[test]
    fn renders_ads_bootstrap() {
        let yaml = render_bootstrap(&params()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["node"]["id"].as_str(), Some("zeropoint-node"));
        assert_eq!(doc["node"]["cluster"].as_str(), Some("zeropoint-cluster"));
        assert_eq!(doc["dynamic_resources"]["ads_config"]["api_type"].as_str(), Some("GRPC"));

        let cluster = &doc["static_resources"]["clusters"][0];
        assert_eq!(cluster["name"].as_str(), Some("xds_cluster"));
        assert_eq!(cluster["type"].as_str(), Some("STATIC"));
        let socket = &cluster["load_assignment"]["endpoints"][0]["lb_endpoints"][0]["endpoint"]
            ["address"]["socket_address"];
        assert_eq!(socket["address"].as_str(), Some("10.0.0.5"));
        assert_eq!(socket["port_value"].as_u64(), Some(18000));
        assert_eq!(doc["admin"]["address"]["socket_address"]["port_value"].as_u64(), Some(9901));
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render_bootstrap(&params()).unwrap(), render_bootstrap(&params()).unwrap());
    }

    #[test]
    fn wildcard_bind_is_advertised_as_loopback() {
        let config = AppConfig::default();
        let params = BootstrapParams::from_config(&config);
        assert_eq!(params.xds_host, "127.0.0.1");
        assert_eq!(params.xds_port, 18000);

        let params = params.with_xds_address(Some("envoy-host".to_string()), Some(18001));
        assert_eq!(params.xds_host, "envoy-host");
        assert_eq!(params.xds_port, 18001);
    }

    #[test]
    fn missing_xds_address_is_rejected() {
        let mut params = params();
        params.xds_port = 0;
        assert!(matches!(render_bootstrap(&params), Err(Error::Validation(_))));
    }
}
