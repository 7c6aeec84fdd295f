//! # Metrics Collection
//!
//! Prometheus metrics for the control plane. Recording through the global
//! helpers is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::RwLock;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Metrics recorder that tracks application metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record an HTTP request
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: f64) {
        counter!(
            "edgeplane_http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("edgeplane_http_request_duration_seconds", "method" => method.to_string())
            .record(duration);
    }

    /// Record an xDS stream opening or closing
    pub fn record_xds_connection(&self, stream: &str, connected: bool) {
        let labels = [("stream", stream.to_string())];
        if connected {
            gauge!("edgeplane_xds_connections_active", &labels).increment(1.0);
        } else {
            gauge!("edgeplane_xds_connections_active", &labels).decrement(1.0);
        }
    }

    /// Record the outcome of one discovery request
    pub fn record_xds_request(&self, type_url: &str, result: &str) {
        let labels = [("type_url", type_url.to_string()), ("result", result.to_string())];
        counter!("edgeplane_xds_requests_total", &labels).increment(1);
    }

    /// Record a registry operation outcome
    pub fn record_exposure_operation(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "error" };
        let labels = [("operation", operation.to_string()), ("result", result.to_string())];
        counter!("edgeplane_exposure_operations_total", &labels).increment(1);
    }

    /// Update the per-protocol exposure gauges
    pub fn set_exposure_counts(&self, http: usize, tcp: usize) {
        gauge!("edgeplane_exposures_total", "protocol" => "http").set(http as f64);
        gauge!("edgeplane_exposures_total", "protocol" => "tcp").set(tcp as f64);
    }

    /// Record a snapshot publish attempt
    pub fn record_snapshot_publish(&self, result: &str, version: Option<u64>) {
        counter!("edgeplane_snapshot_publish_total", "result" => result.to_string()).increment(1);
        if let Some(version) = version {
            gauge!("edgeplane_snapshot_version").set(version as f64);
        }
    }

    fn describe(&self) {
        describe_counter!("edgeplane_http_requests_total", "HTTP requests served by the API");
        describe_histogram!(
            "edgeplane_http_request_duration_seconds",
            Unit::Seconds,
            "HTTP request latency"
        );
        describe_gauge!("edgeplane_xds_connections_active", "Open xDS streams");
        describe_counter!("edgeplane_xds_requests_total", "Discovery requests by type and result");
        describe_counter!(
            "edgeplane_exposure_operations_total",
            "Registry operations by kind and result"
        );
        describe_gauge!("edgeplane_exposures_total", "Registered exposures by protocol");
        describe_counter!("edgeplane_snapshot_publish_total", "Snapshot publish attempts");
        describe_gauge!("edgeplane_snapshot_version", "Last installed snapshot version");

        gauge!("edgeplane_exposures_total", "protocol" => "http").set(0.0);
        gauge!("edgeplane_exposures_total", "protocol" => "tcp").set(0.0);
    }
}

/// Global metrics recorder instance
static METRICS: once_cell::sync::Lazy<Arc<RwLock<Option<MetricsRecorder>>>> =
    once_cell::sync::Lazy::new(|| Arc::new(RwLock::new(None)));

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    let recorder = MetricsRecorder::new();
    recorder.describe();
    *METRICS.write().await = Some(recorder);

    info!(metrics_addr = %metrics_addr, service_name = %config.service_name, "Metrics collection initialized");
    Ok(())
}

/// Get the global metrics recorder
pub async fn get_metrics() -> Option<MetricsRecorder> {
    METRICS.read().await.clone()
}

pub async fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_http_request(method, path, status, duration);
    }
}

pub async fn record_xds_connection(stream: &str, connected: bool) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_xds_connection(stream, connected);
    }
}

pub async fn record_xds_request(type_url: &str, result: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_xds_request(type_url, result);
    }
}

pub async fn record_exposure_operation(operation: &str, success: bool) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_exposure_operation(operation, success);
    }
}

pub async fn set_exposure_counts(http: usize, tcp: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.set_exposure_counts(http, tcp);
    }
}

pub async fn record_snapshot_publish(result: &str, version: Option<u64>) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_snapshot_publish(result, version);
    }
}
