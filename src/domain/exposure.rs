//! Exposure model
//!
//! An exposure binds an application's container port to either a hostname on
//! the shared HTTP listener or a dedicated TCP host port.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::id::ExposureId;
use crate::errors::Error;

/// Suffix Envoy virtual hosts also answer to, for mDNS-style client requests.
pub const LOCAL_DOMAIN_SUFFIX: &str = ".local";

/// Traffic protocol of an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Layer-7 routing by hostname on the shared HTTP listener
    Http,
    /// Raw TCP forwarding on a dedicated host port
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "tcp" => Ok(Protocol::Tcp),
            other => {
                Err(Error::validation(format!("protocol must be 'http' or 'tcp', got '{}'", other)))
            }
        }
    }
}

/// Live reachability of an exposure's target container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Available,
    Unavailable,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Available => f.write_str("available"),
            ContainerStatus::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// A declared binding from an app's container port to an external hostname or port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Exposure {
    #[schema(value_type = String, example = "exp_3f9a0c1d2b4e5f60")]
    pub id: ExposureId,
    pub app_id: String,
    pub protocol: Protocol,
    /// Empty for tcp exposures
    #[serde(default)]
    pub hostname: String,
    pub container_port: u16,
    /// Always 0 for http exposures
    #[serde(default)]
    pub host_port: u16,
    pub created_at: DateTime<Utc>,
}

impl Exposure {
    /// Whether this exposure has the given natural dedup key.
    pub fn matches_key(
        &self,
        app_id: &str,
        protocol: Protocol,
        hostname: &str,
        container_port: u16,
    ) -> bool {
        self.app_id == app_id
            && self.protocol == protocol
            && self.hostname == hostname
            && self.container_port == container_port
    }

    pub fn is_http(&self) -> bool {
        self.protocol == Protocol::Http
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol == Protocol::Tcp
    }

    /// Domains the exposure's virtual host answers to.
    pub fn domains(&self) -> Vec<String> {
        hostname_domains(&self.hostname)
    }

    pub fn cluster_name(&self) -> String {
        format!("cluster_{}", self.id)
    }

    pub fn virtual_host_name(&self) -> String {
        format!("vhost_{}", self.id)
    }

    pub fn tcp_listener_name(&self) -> String {
        format!("tcp_listener_{}", self.id)
    }

    pub fn tcp_stat_prefix(&self) -> String {
        format!("tcp_{}", self.id)
    }
}

/// Canonical form of a hostname as stored on an exposure.
/// Domains an HTTP exposure of `hostname` claims: the hostname itself plus
/// its `.local` alias.
pub fn hostname_domains(hostname: &str) -> Vec<String> {
    let mut domains = vec![hostname.to_string()];
    if !hostname.ends_with(LOCAL_DOMAIN_SUFFIX) {
        domains.push(format!("{}{}", hostname, LOCAL_DOMAIN_SUFFIX));
    }
    domains
}

pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}
