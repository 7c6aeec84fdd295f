//! xDS Streaming Protocol Implementation
//!
//! Shared stream loops for the State of the World (SOTW) and Delta variants
//! of the discovery protocol. ADS and the per-type CDS/LDS/RDS/EDS services
//! all run on these loops and differ only in their responder and default
//! type URL.
//!
//! # SOTW
//!
//! 1. Envoy sends a `DiscoveryRequest` per type with an empty version.
//! 2. The server answers with every (or every named) resource of the type,
//!    the snapshot version and a fresh nonce.
//! 3. Envoy ACKs by echoing version and nonce; ACKs for the current version
//!    are skipped. NACKs carry `error_detail` and are logged.
//! 4. When the node's snapshot changes, every subscribed type touched by the
//!    change (or not answered yet) is pushed again.
//!
//! # Delta
//!
//! The first request per type gets the full resource set; later pushes carry
//! only added/updated and removed resources.
//!
//! Requests from a node without an installed snapshot get no response until
//! one is installed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse, Resource,
};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tonic::Status;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::observability::metrics;
use crate::xds::state::{ResourceDelta, ResourceUpdate, XdsState};

/// Outgoing channel depth per stream
const RESPONSE_CHANNEL_CAPACITY: usize = 100;

/// Tracks the last sent version and nonce for ACK/NACK detection
#[derive(Clone, Debug)]
struct LastDiscoverySnapshot {
    version: Arc<str>,
    nonce: Arc<str>,
}

fn node_id(node: &Option<Node>) -> &str {
    node.as_ref().map(|n| n.id.as_str()).unwrap_or_default()
}

/// Per-stream SOTW bookkeeping.
struct SotwSession<F> {
    state: Arc<XdsState>,
    responder: F,
    label: Arc<str>,
    node: Option<Node>,
    /// Subscribed type URL -> requested resource names (empty = wildcard)
    subscriptions: HashMap<String, Vec<String>>,
    last_sent: HashMap<String, LastDiscoverySnapshot>,
    tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
}

impl<F> SotwSession<F>
where
    F: Fn(
            Arc<XdsState>,
            DiscoveryRequest,
        ) -> Pin<Box<dyn Future<Output = crate::Result<Option<DiscoveryResponse>>> + Send>>
        + Send
        + Sync
        + 'static,
{
    /// Handle one client request. Returns `false` once the client is gone.
    async fn handle_request(&mut self, mut request: DiscoveryRequest) -> bool {
        if request.node.is_some() {
            self.node = request.node.clone();
        } else {
            request.node = self.node.clone();
        }

        let type_url = request.type_url.clone();
        info!(
            type_url = %type_url,
            version_info = %request.version_info,
            node_id = %node_id(&request.node),
            stream = %self.label,
            "Received discovery request"
        );

        let previous_names = self.subscriptions.insert(type_url.clone(), request.resource_names.clone());
        let names_changed = previous_names.as_ref() != Some(&request.resource_names);

        let last_snapshot = self.last_sent.get(&type_url).cloned();

        // A nonce other than the last one sent answers a response that has
        // since been superseded; the newer response is already in flight.
        if let Some(last) = &last_snapshot {
            if !names_changed
                && !request.response_nonce.is_empty()
                && request.response_nonce.as_str() != last.nonce.as_ref()
            {
                debug!(
                    type_url = %type_url,
                    nonce = %request.response_nonce,
                    latest_nonce = %last.nonce,
                    stream = %self.label,
                    "Ignoring discovery request with stale nonce"
                );
                metrics::record_xds_request(&type_url, "stale").await;
                return true;
            }
        }

        let answers_last = last_snapshot.is_some() && !request.response_nonce.is_empty();

        if answers_last && !names_changed && request.error_detail.is_none() {
            debug!(
                type_url = %type_url,
                version = %request.version_info,
                nonce = %request.response_nonce,
                stream = %self.label,
                "[ACK] Skipping duplicate discovery request"
            );
            metrics::record_xds_request(&type_url, "ack").await;
            return true;
        }

        if let Some(error_detail) = request.error_detail.as_ref() {
            warn!(
                type_url = %type_url,
                nonce = %request.response_nonce,
                error_code = error_detail.code,
                error_message = %error_detail.message,
                node_id = %node_id(&self.node),
                stream = %self.label,
                "[NACK] Envoy rejected previous response"
            );
            metrics::record_xds_request(&type_url, "nack").await;

            // The rejected content is what the cache holds; newer content
            // arrives through the update broadcast.
            if answers_last && !names_changed {
                return true;
            }
        }

        self.respond(request).await
    }

    /// Push fresh state for every subscribed type the update concerns.
    async fn handle_update(&mut self, update: &ResourceUpdate) -> bool {
        if self.node.is_none() || node_id(&self.node) != update.node_id {
            return true;
        }

        let mut types: Vec<String> = self
            .subscriptions
            .keys()
            .filter(|type_url| update.touches(type_url) || !self.last_sent.contains_key(*type_url))
            .cloned()
            .collect();
        types.sort();

        for type_url in types {
            let request = DiscoveryRequest {
                resource_names: self.subscriptions.get(&type_url).cloned().unwrap_or_default(),
                type_url,
                node: self.node.clone(),
                ..Default::default()
            };
            let span = tracing::info_span!("xds_sotw_push_update", type_url = %request.type_url, stream = %self.label);
            if !self.respond(request).instrument(span).await {
                return false;
            }
        }
        true
    }

    async fn respond(&mut self, request: DiscoveryRequest) -> bool {
        let type_url = request.type_url.clone();
        match (self.responder)(self.state.clone(), request).await {
            Ok(Some(response)) => {
                info!(
                    type_url = %response.type_url,
                    version = %response.version_info,
                    nonce = %response.nonce,
                    resource_count = response.resources.len(),
                    stream = %self.label,
                    "Sending discovery response"
                );
                self.last_sent.insert(
                    response.type_url.clone(),
                    LastDiscoverySnapshot {
                        version: Arc::from(response.version_info.as_str()),
                        nonce: Arc::from(response.nonce.as_str()),
                    },
                );
                metrics::record_xds_request(&type_url, "ok").await;

                if self.tx.send(Ok(response)).await.is_err() {
                    error!(stream = %self.label, "Discovery response receiver dropped");
                    return false;
                }
                true
            }
            Ok(None) => {
                debug!(
                    type_url = %type_url,
                    node_id = %node_id(&self.node),
                    stream = %self.label,
                    "No snapshot for node yet, holding request"
                );
                metrics::record_xds_request(&type_url, "held").await;
                true
            }
            Err(e) => {
                error!(type_url = %type_url, stream = %self.label, error = %e, "Failed to create resource response");
                metrics::record_xds_request(&type_url, "error").await;
                true
            }
        }
    }
}

/// Run the shared SOTW stream loop.
///
/// `default_type_url` fills in the type of requests that omit it, which the
/// single-type services allow.
pub fn run_stream_loop<S, F>(
    state: Arc<XdsState>,
    mut in_stream: S,
    responder: F,
    label: &str,
    default_type_url: Option<&'static str>,
) -> ReceiverStream<std::result::Result<DiscoveryResponse, Status>>
where
    S: Stream<Item = std::result::Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
    F: Fn(
            Arc<XdsState>,
            DiscoveryRequest,
        ) -> Pin<Box<dyn Future<Output = crate::Result<Option<DiscoveryResponse>>> + Send>>
        + Send
        + Sync
        + 'static,
{
    let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
    let label: Arc<str> = Arc::from(label);
    let mut update_rx = state.subscribe_updates();
    let shutdown = state.shutdown_token();

    let mut session = SotwSession {
        state,
        responder,
        label: label.clone(),
        node: None,
        subscriptions: HashMap::new(),
        last_sent: HashMap::new(),
        tx: tx.clone(),
    };

    tokio::spawn(async move {
        metrics::record_xds_connection(&label, true).await;

        loop {
            tokio::select! {
                result = in_stream.next() => {
                    match result {
                        Some(Ok(mut request)) => {
                            if request.type_url.is_empty() {
                                if let Some(type_url) = default_type_url {
                                    request.type_url = type_url.to_string();
                                }
                            }
                            let span = crate::discovery_span!(
                                "sotw",
                                node_id(&request.node),
                                type_url = %request.type_url,
                                stream = %label
                            );
                            if !session.handle_request(request).instrument(span).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(stream = %label, error = %e, "Error receiving discovery request");
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                        None => {
                            info!(stream = %label, "Stream ended by client");
                            break;
                        }
                    }
                }
                update = update_rx.recv() => {
                    match update {
                        Ok(update) => {
                            if !session.handle_update(&update).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(stream = %label, skipped = skipped, "Missed update notifications, resending subscribed types");
                            let resync = ResourceUpdate {
                                node_id: node_id(&session.node).to_string(),
                                version: String::new(),
                                deltas: session
                                    .subscriptions
                                    .keys()
                                    .map(|t| ResourceDelta { type_url: t.clone(), ..Default::default() })
                                    .collect(),
                            };
                            if !session.handle_update(&resync).await {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!(stream = %label, "Update notification channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(stream = %label, "Shutting down stream");
                    break;
                }
            }
        }

        metrics::record_xds_connection(&label, false).await;
    });

    ReceiverStream::new(rx)
}

/// Per-stream Delta bookkeeping.
struct DeltaSession<F> {
    state: Arc<XdsState>,
    responder: F,
    label: Arc<str>,
    node: Option<Node>,
    subscribed: HashSet<String>,
    answered: HashSet<String>,
    tx: mpsc::Sender<Result<DeltaDiscoveryResponse, Status>>,
}

impl<F> DeltaSession<F>
where
    F: Fn(
            Arc<XdsState>,
            DeltaDiscoveryRequest,
        ) -> Pin<Box<dyn Future<Output = crate::Result<Option<DeltaDiscoveryResponse>>> + Send>>
        + Send
        + Sync
        + 'static,
{
    async fn handle_request(&mut self, mut request: DeltaDiscoveryRequest) -> bool {
        if request.node.is_some() {
            self.node = request.node.clone();
        } else {
            request.node = self.node.clone();
        }

        info!(
            type_url = %request.type_url,
            nonce = %request.response_nonce,
            node_id = %node_id(&request.node),
            stream = %self.label,
            "Received delta discovery request"
        );

        if !request.response_nonce.is_empty() {
            if let Some(error_detail) = &request.error_detail {
                warn!(
                    nonce = %request.response_nonce,
                    error_code = error_detail.code,
                    error_message = %error_detail.message,
                    type_url = %request.type_url,
                    stream = %self.label,
                    "[NACK] Delta request rejected by Envoy"
                );
                metrics::record_xds_request(&request.type_url, "nack").await;
            } else {
                debug!(
                    nonce = %request.response_nonce,
                    type_url = %request.type_url,
                    stream = %self.label,
                    "[ACK] Delta request acknowledged"
                );
                metrics::record_xds_request(&request.type_url, "ack").await;
            }

            if self.answered.contains(&request.type_url) {
                return true;
            }
        }

        self.subscribed.insert(request.type_url.clone());
        self.respond(request).await
    }

    async fn handle_update(&mut self, update: &ResourceUpdate) -> bool {
        if self.node.is_none() || node_id(&self.node) != update.node_id {
            return true;
        }

        let mut types: Vec<String> = self.subscribed.iter().cloned().collect();
        types.sort();

        for type_url in types {
            if !self.answered.contains(&type_url) {
                let request = DeltaDiscoveryRequest {
                    type_url,
                    node: self.node.clone(),
                    ..Default::default()
                };
                if !self.respond(request).await {
                    return false;
                }
                continue;
            }

            let Some(delta) = update.delta_for(&type_url) else {
                continue;
            };
            if delta.is_empty() {
                continue;
            }

            let response = build_delta_response(&update.version, delta);
            info!(
                type_url = %delta.type_url,
                added = delta.added_or_updated.len(),
                removed = delta.removed.len(),
                version = %update.version,
                stream = %self.label,
                "Sending delta push update to client"
            );
            metrics::record_xds_request(&type_url, "ok").await;
            if self.tx.send(Ok(response)).await.is_err() {
                error!(stream = %self.label, "Delta response receiver dropped");
                return false;
            }
        }
        true
    }

    async fn respond(&mut self, request: DeltaDiscoveryRequest) -> bool {
        let type_url = request.type_url.clone();
        match (self.responder)(self.state.clone(), request).await {
            Ok(Some(response)) => {
                info!(
                    type_url = %response.type_url,
                    nonce = %response.nonce,
                    version = %response.system_version_info,
                    resource_count = response.resources.len(),
                    stream = %self.label,
                    "Sending delta response"
                );
                self.answered.insert(type_url.clone());
                metrics::record_xds_request(&type_url, "ok").await;
                if self.tx.send(Ok(response)).await.is_err() {
                    error!(stream = %self.label, "Delta response receiver dropped");
                    return false;
                }
                true
            }
            Ok(None) => {
                debug!(type_url = %type_url, node_id = %node_id(&self.node), stream = %self.label, "No snapshot for node yet, holding delta request");
                metrics::record_xds_request(&type_url, "held").await;
                true
            }
            Err(e) => {
                error!(type_url = %type_url, stream = %self.label, error = %e, "Failed to create delta response");
                metrics::record_xds_request(&type_url, "error").await;
                true
            }
        }
    }
}

/// Run the shared Delta stream loop.
pub fn run_delta_loop<S, F>(
    state: Arc<XdsState>,
    mut in_stream: S,
    responder: F,
    label: &str,
    default_type_url: Option<&'static str>,
) -> ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>
where
    S: Stream<Item = std::result::Result<DeltaDiscoveryRequest, Status>> + Send + Unpin + 'static,
    F: Fn(
            Arc<XdsState>,
            DeltaDiscoveryRequest,
        ) -> Pin<Box<dyn Future<Output = crate::Result<Option<DeltaDiscoveryResponse>>> + Send>>
        + Send
        + Sync
        + 'static,
{
    let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
    let label: Arc<str> = Arc::from(label);
    let mut update_rx = state.subscribe_updates();
    let shutdown = state.shutdown_token();

    let mut session = DeltaSession {
        state,
        responder,
        label: label.clone(),
        node: None,
        subscribed: HashSet::new(),
        answered: HashSet::new(),
        tx: tx.clone(),
    };

    tokio::spawn(async move {
        metrics::record_xds_connection(&label, true).await;

        loop {
            tokio::select! {
                result = in_stream.next() => {
                    match result {
                        Some(Ok(mut request)) => {
                            if request.type_url.is_empty() {
                                if let Some(type_url) = default_type_url {
                                    request.type_url = type_url.to_string();
                                }
                            }
                            let span = crate::discovery_span!(
                                "delta",
                                node_id(&request.node),
                                type_url = %request.type_url,
                                stream = %label
                            );
                            if !session.handle_request(request).instrument(span).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(stream = %label, error = %e, "Error receiving delta discovery request");
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                        None => {
                            info!(stream = %label, "Delta stream ended by client");
                            break;
                        }
                    }
                }
                update = update_rx.recv() => {
                    match update {
                        Ok(update) => {
                            if !session.handle_update(&update).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Missed deltas cannot be reconstructed; resend full state.
                            warn!(stream = %label, skipped = skipped, "Missed delta update notifications, resending full state");
                            session.answered.clear();
                            let resync = ResourceUpdate {
                                node_id: node_id(&session.node).to_string(),
                                ..Default::default()
                            };
                            if !session.handle_update(&resync).await {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!(stream = %label, "Update notification channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(stream = %label, "Shutting down delta stream");
                    break;
                }
            }
        }

        metrics::record_xds_connection(&label, false).await;
    });

    ReceiverStream::new(rx)
}

/// Build a DeltaDiscoveryResponse from a ResourceDelta.
pub(crate) fn build_delta_response(version: &str, delta: &ResourceDelta) -> DeltaDiscoveryResponse {
    let resources: Vec<Resource> = delta
        .added_or_updated
        .iter()
        .map(|cached| Resource {
            name: cached.name.clone(),
            version: cached.version.clone(),
            resource: Some(cached.body.clone()),
            ..Default::default()
        })
        .collect();

    DeltaDiscoveryResponse {
        system_version_info: version.to_string(),
        type_url: delta.type_url.clone(),
        nonce: Uuid::new_v4().to_string(),
        resources,
        removed_resources: delta.removed.clone(),
        ..Default::default()
    }
}
