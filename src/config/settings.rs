//! # Configuration Settings
//!
//! Defines the configuration structure for the edgeplane control plane.

use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{Error, Result};

/// File name of the persisted exposure collection inside the state directory.
pub const EXPOSURES_FILE_NAME: &str = "exposures.json";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// xDS server configuration
    #[validate(nested)]
    pub xds: XdsConfig,

    /// REST API configuration
    #[validate(nested)]
    pub api: ApiConfig,

    /// Exposure registry configuration
    #[validate(nested)]
    pub registry: RegistryConfig,

    /// Managed proxy configuration
    #[validate(nested)]
    pub proxy: ProxyConfig,

    /// Container runtime configuration
    #[validate(nested)]
    pub runtime: RuntimeConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;

        self.validate_custom()
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.registry.tcp_port_min >= self.registry.tcp_port_max {
            return Err(Error::config(format!(
                "TCP port range is empty: {}..{}",
                self.registry.tcp_port_min, self.registry.tcp_port_max
            )));
        }

        if self.registry.port_range().contains(&self.proxy.http_port) {
            return Err(Error::config(format!(
                "Proxy HTTP port {} lies inside the TCP exposure range {}..{}",
                self.proxy.http_port, self.registry.tcp_port_min, self.registry.tcp_port_max
            )));
        }

        if self.api.bind_address == self.xds.bind_address && self.api.port == self.xds.port {
            return Err(Error::config("API and xDS servers cannot share a port"));
        }

        Ok(())
    }
}

/// xDS gRPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct XdsConfig {
    /// xDS server bind address
    #[validate(length(min = 1, message = "xDS bind address cannot be empty"))]
    pub bind_address: String,

    /// xDS server port
    #[validate(range(min = 1, message = "xDS port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 18000 }
    }
}

impl XdsConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// REST API server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    #[validate(length(min = 1, message = "API bind address cannot be empty"))]
    pub bind_address: String,

    #[validate(range(min = 1, message = "API port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 2370 }
    }
}

impl ApiConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Exposure registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegistryConfig {
    /// Directory holding the persisted exposure collection
    #[validate(length(min = 1, message = "State directory cannot be empty"))]
    pub state_dir: String,

    /// First TCP host port handed out (inclusive)
    #[validate(range(min = 1, message = "TCP port range must start above 0"))]
    pub tcp_port_min: u16,

    /// End of the TCP host port range (exclusive)
    #[validate(range(min = 2, message = "TCP port range end must be above 1"))]
    pub tcp_port_max: u16,

    /// How often a pending snapshot publish is retried
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Republish interval must be between 1 and 3600 seconds"
    ))]
    pub republish_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tcp_port_min: 10000,
            tcp_port_max: 60000,
            republish_interval_seconds: 30,
        }
    }
}

impl RegistryConfig {
    pub fn state_file(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join(EXPOSURES_FILE_NAME)
    }

    pub fn port_range(&self) -> Range<u16> {
        self.tcp_port_min..self.tcp_port_max
    }

    pub fn republish_interval(&self) -> Duration {
        Duration::from_secs(self.republish_interval_seconds)
    }
}

fn default_state_dir() -> String {
    if let Ok(root) = std::env::var("APP_STORAGE_ROOT") {
        if !root.is_empty() {
            return root;
        }
    }

    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => {
            PathBuf::from(home).join(".edgeplane").to_string_lossy().into_owned()
        }
        _ => ".edgeplane".to_string(),
    }
}

/// Settings describing the single managed Envoy instance
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProxyConfig {
    /// Node id Envoy presents to the discovery server
    #[validate(length(min = 1, message = "Node id cannot be empty"))]
    pub node_id: String,

    /// Node cluster written into the bootstrap document
    #[validate(length(min = 1, message = "Node cluster cannot be empty"))]
    pub node_cluster: String,

    /// Port of the shared HTTP listener
    #[validate(range(min = 1, message = "HTTP port must be between 1 and 65535"))]
    pub http_port: u16,

    /// Envoy admin port written into the bootstrap document
    #[validate(range(min = 1, message = "Admin port must be between 1 and 65535"))]
    pub admin_port: u16,

    /// Bridge network shared by Envoy and exposed containers
    #[validate(length(min = 1, message = "Network name cannot be empty"))]
    pub network_name: String,

    /// Appended to an app id to obtain its container name
    pub container_suffix: String,

    /// Upstream connect timeout for synthesized clusters
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connect timeout must be between 1 and 300 seconds"
    ))]
    pub connect_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            node_id: "zeropoint-node".to_string(),
            node_cluster: "zeropoint-cluster".to_string(),
            http_port: 80,
            admin_port: 9901,
            network_name: "zeropoint-network".to_string(),
            container_suffix: "-main".to_string(),
            connect_timeout_seconds: 5,
        }
    }
}

impl ProxyConfig {
    pub fn container_name(&self, app_id: &str) -> String {
        format!("{}{}", app_id, self.container_suffix)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Which container runtime backs the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Memory,
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown runtime '{}', expected 'docker' or 'memory'", other)),
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,

    /// Docker Engine API unix socket
    #[validate(length(min = 1, message = "Docker socket path cannot be empty"))]
    pub docker_socket: String,

    /// Upper bound for a single runtime call
    #[validate(range(
        min = 1,
        max = 120,
        message = "Runtime timeout must be between 1 and 120 seconds"
    ))]
    pub timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Docker,
            docker_socket: "/var/run/docker.sock".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_port: 9090,
            service_name: "edgeplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
