//! # Structured Logging
//!
//! Subscriber setup and span macros used across the control plane. Every
//! log line carries structured fields (`exposure_id`, `app_id`, `version`,
//! `type_url`, ...) rather than interpolated text.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, ObservabilityConfig};

/// Span wrapping one management API request.
#[macro_export]
macro_rules! api_span {
    ($method:expr, $path:expr) => {
        tracing::info_span!(
            "api_request",
            http.method = %$method,
            http.path = %$path,
            request_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Span wrapping one discovery request on an open stream. Extra fields are
/// appended after the node id.
#[macro_export]
macro_rules! discovery_span {
    ($request:expr, $node_id:expr) => {
        tracing::info_span!("discovery_request", request = %$request, node_id = %$node_id)
    };
    ($request:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "discovery_request",
            request = %$request,
            node_id = %$node_id,
            $($field)*
        )
    };
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level. Returns `false` if a subscriber was already installed.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json_logging {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).try_init()
    };

    result.is_ok()
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        xds_address = %config.xds.socket_address(),
        api_address = %config.api.socket_address(),
        state_file = %config.registry.state_file().display(),
        tcp_port_range = %format!("{}-{}", config.registry.tcp_port_min, config.registry.tcp_port_max),
        node_id = %config.proxy.node_id,
        network = %config.proxy.network_name,
        runtime = ?config.runtime.kind,
        metrics_enabled = %config.observability.enable_metrics,
        "Edgeplane control plane configuration"
    );
}
