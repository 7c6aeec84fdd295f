//! # Configuration Management
//!
//! Loads the control plane configuration from `EDGEPLANE_*` environment
//! variables on top of the defaults in [`settings`], then validates it.

use std::fmt::Display;
use std::str::FromStr;

use crate::Result;

pub mod settings;

pub use settings::{
    ApiConfig, AppConfig, ObservabilityConfig, ProxyConfig, RegistryConfig, RuntimeConfig,
    RuntimeKind, XdsConfig, EXPOSURES_FILE_NAME,
};

/// Prefix shared by every environment variable the control plane reads
pub const ENV_PREFIX: &str = "EDGEPLANE_";

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let config = AppConfig {
            xds: XdsConfig {
                bind_address: env_string("XDS_BIND_ADDRESS", defaults.xds.bind_address),
                port: env_parse("XDS_PORT", defaults.xds.port)?,
            },
            api: ApiConfig {
                bind_address: env_string("API_BIND_ADDRESS", defaults.api.bind_address),
                port: env_parse("API_PORT", defaults.api.port)?,
            },
            registry: RegistryConfig {
                state_dir: env_string("STATE_DIR", defaults.registry.state_dir),
                tcp_port_min: env_parse("TCP_PORT_MIN", defaults.registry.tcp_port_min)?,
                tcp_port_max: env_parse("TCP_PORT_MAX", defaults.registry.tcp_port_max)?,
                republish_interval_seconds: env_parse(
                    "REPUBLISH_INTERVAL_SECS",
                    defaults.registry.republish_interval_seconds,
                )?,
            },
            proxy: ProxyConfig {
                node_id: env_string("NODE_ID", defaults.proxy.node_id),
                node_cluster: env_string("NODE_CLUSTER", defaults.proxy.node_cluster),
                http_port: env_parse("HTTP_PORT", defaults.proxy.http_port)?,
                admin_port: env_parse("ADMIN_PORT", defaults.proxy.admin_port)?,
                network_name: env_string("NETWORK_NAME", defaults.proxy.network_name),
                container_suffix: env_string(
                    "CONTAINER_SUFFIX",
                    defaults.proxy.container_suffix,
                ),
                connect_timeout_seconds: env_parse(
                    "CONNECT_TIMEOUT_SECS",
                    defaults.proxy.connect_timeout_seconds,
                )?,
            },
            runtime: RuntimeConfig {
                kind: env_parse("RUNTIME", defaults.runtime.kind)?,
                docker_socket: env_string("DOCKER_SOCKET", defaults.runtime.docker_socket),
                timeout_seconds: env_parse(
                    "RUNTIME_TIMEOUT_SECS",
                    defaults.runtime.timeout_seconds,
                )?,
            },
            observability: ObservabilityConfig {
                enable_metrics: env_parse("ENABLE_METRICS", defaults.observability.enable_metrics)?,
                metrics_port: env_parse("METRICS_PORT", defaults.observability.metrics_port)?,
                service_name: defaults.observability.service_name,
                log_level: env_string("LOG_LEVEL", defaults.observability.log_level),
                json_logging: match std::env::var(format!("{}LOG_FORMAT", ENV_PREFIX)) {
                    Ok(format) => format.eq_ignore_ascii_case("json"),
                    Err(_) => defaults.observability.json_logging,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(format!("{}{}", ENV_PREFIX, key)).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid {}='{}': {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}
