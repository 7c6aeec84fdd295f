//! Builds discovery responses from the installed snapshot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse, Resource,
};
use tracing::warn;
use uuid::Uuid;

use crate::xds::resources::SERVED_TYPE_URLS;
use crate::xds::state::{CachedResource, XdsState};
use crate::Result;

const WILDCARD: &str = "*";

fn is_wildcard(names: &[String]) -> bool {
    names.is_empty() || names.iter().any(|n| n == WILDCARD)
}

fn requested_node_id(node: &Option<envoy_types::pb::envoy::config::core::v3::Node>) -> &str {
    node.as_ref().map(|n| n.id.as_str()).unwrap_or_default()
}

fn select(state: &XdsState, node_id: &str, type_url: &str, names: &[String]) -> Option<(String, Vec<CachedResource>)> {
    let snapshot = state.snapshot(node_id)?;
    if !SERVED_TYPE_URLS.contains(&type_url) {
        warn!(type_url = %type_url, "Unknown resource type requested");
    }
    let resources = if is_wildcard(names) {
        snapshot.resources(type_url)
    } else {
        snapshot.resources_named(type_url, names)
    };
    Some((snapshot.version().to_string(), resources))
}

/// State-of-the-world response for `request`, or `None` when the requesting
/// node has no snapshot yet.
pub fn sotw_response(state: &XdsState, request: &DiscoveryRequest) -> Result<Option<DiscoveryResponse>> {
    let node_id = requested_node_id(&request.node);
    let Some((version, resources)) =
        select(state, node_id, &request.type_url, &request.resource_names)
    else {
        return Ok(None);
    };

    Ok(Some(DiscoveryResponse {
        version_info: version,
        resources: resources.into_iter().map(|r| r.body).collect(),
        type_url: request.type_url.clone(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    }))
}

/// Full-state delta response for an initial delta request.
pub fn delta_response(
    state: &XdsState,
    request: &DeltaDiscoveryRequest,
) -> Result<Option<DeltaDiscoveryResponse>> {
    let node_id = requested_node_id(&request.node);
    let Some((version, resources)) =
        select(state, node_id, &request.type_url, &request.resource_names_subscribe)
    else {
        return Ok(None);
    };

    let resources = resources
        .into_iter()
        .map(|cached| Resource {
            name: cached.name,
            version: cached.version,
            resource: Some(cached.body),
            ..Default::default()
        })
        .collect();

    Ok(Some(DeltaDiscoveryResponse {
        system_version_info: version,
        type_url: request.type_url.clone(),
        nonce: Uuid::new_v4().to_string(),
        resources,
        removed_resources: request.resource_names_unsubscribe.clone(),
        ..Default::default()
    }))
}

/// Responder used by the SOTW stream loop.
pub fn sotw_responder(
    state: Arc<XdsState>,
    request: DiscoveryRequest,
) -> Pin<Box<dyn Future<Output = Result<Option<DiscoveryResponse>>> + Send>> {
    Box::pin(async move { sotw_response(&state, &request) })
}

/// Responder used by the Delta stream loop.
pub fn delta_responder(
    state: Arc<XdsState>,
    request: DeltaDiscoveryRequest,
) -> Pin<Box<dyn Future<Output = Result<Option<DeltaDiscoveryResponse>>> + Send>> {
    Box::pin(async move { delta_response(&state, &request) })
}
