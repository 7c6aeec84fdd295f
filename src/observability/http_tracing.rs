//! # HTTP Request Tracing Middleware
//!
//! Axum middleware that wraps each API request in a span and records the
//! request counter and latency histogram.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;

use crate::observability::metrics;

/// Axum middleware recording a span and metrics for each HTTP request.
pub async fn trace_http_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let span = crate::api_span!(method, path);
    let response = next.run(request).instrument(span.clone()).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    span.in_scope(|| {
        tracing::debug!(status = status, elapsed_ms = elapsed.as_millis() as u64, "Request completed");
    });

    metrics::record_http_request(&method, &normalize_path_for_metrics(&path), status, elapsed.as_secs_f64())
        .await;

    response
}

/// Replace exposure ids and app ids with placeholders to bound label
/// cardinality.
fn normalize_path_for_metrics(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut normalized = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let previous = if i > 0 { segments.get(i - 1).copied() } else { None };
        match previous {
            Some("exposures") if !segment.is_empty() => normalized.push(":id"),
            Some("apps") if !segment.is_empty() => normalized.push(":app_id"),
            _ => normalized.push(*segment),
        }
    }

    normalized.join("/")
}
