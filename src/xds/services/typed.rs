//! Single-type discovery services (CDS, LDS, RDS, EDS).
//!
//! Each service runs the shared stream loops pinned to its own type URL and
//! answers unary fetches from the same snapshot cache as ADS.

use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::responses::{delta_responder, sotw_responder, sotw_response};
use super::stream::{run_delta_loop, run_stream_loop};
use crate::observability::metrics;
use crate::xds::resources::{
    CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL,
};
use crate::xds::state::XdsState;

type SotwStream =
    Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
type DeltaStream =
    Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

/// CDS, LDS, RDS and EDS over the shared snapshot cache
#[derive(Debug, Clone)]
pub struct SnapshotDiscoveryService {
    state: Arc<XdsState>,
}

impl SnapshotDiscoveryService {
    pub fn new(state: Arc<XdsState>) -> Self {
        Self { state }
    }

    fn stream(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
        type_url: &'static str,
        label: &str,
    ) -> SotwStream {
        info!(stream = %label, remote_addr = ?request.remote_addr(), "New discovery stream established");
        Box::pin(run_stream_loop(
            self.state.clone(),
            request.into_inner(),
            sotw_responder,
            label,
            Some(type_url),
        ))
    }

    fn delta(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
        type_url: &'static str,
        label: &str,
    ) -> DeltaStream {
        info!(stream = %label, remote_addr = ?request.remote_addr(), "New delta discovery stream established");
        Box::pin(run_delta_loop(
            self.state.clone(),
            request.into_inner(),
            delta_responder,
            label,
            Some(type_url),
        ))
    }

    async fn fetch(
        &self,
        request: Request<DiscoveryRequest>,
        type_url: &'static str,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        let mut request = request.into_inner();
        if request.type_url.is_empty() {
            request.type_url = type_url.to_string();
        }
        if request.type_url != type_url {
            return Err(Status::invalid_argument(format!(
                "type_url '{}' is not served by this endpoint",
                request.type_url
            )));
        }

        match sotw_response(&self.state, &request) {
            Ok(Some(response)) => {
                metrics::record_xds_request(type_url, "ok").await;
                Ok(Response::new(response))
            }
            Ok(None) => {
                metrics::record_xds_request(type_url, "held").await;
                Err(Status::unavailable("no configuration snapshot for node"))
            }
            Err(e) => {
                warn!(type_url = %type_url, error = %e, "Failed to build fetch response");
                metrics::record_xds_request(type_url, "error").await;
                Err(Status::internal(e.to_string()))
            }
        }
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for SnapshotDiscoveryService {
    type StreamClustersStream = SotwStream;
    type DeltaClustersStream = DeltaStream;

    async fn stream_clusters(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamClustersStream>, Status> {
        Ok(Response::new(self.stream(request, CLUSTER_TYPE_URL, "CDS")))
    }

    async fn delta_clusters(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaClustersStream>, Status> {
        Ok(Response::new(self.delta(request, CLUSTER_TYPE_URL, "Delta-CDS")))
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, CLUSTER_TYPE_URL).await
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for SnapshotDiscoveryService {
    type StreamListenersStream = SotwStream;
    type DeltaListenersStream = DeltaStream;

    async fn stream_listeners(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamListenersStream>, Status> {
        Ok(Response::new(self.stream(request, LISTENER_TYPE_URL, "LDS")))
    }

    async fn delta_listeners(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaListenersStream>, Status> {
        Ok(Response::new(self.delta(request, LISTENER_TYPE_URL, "Delta-LDS")))
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, LISTENER_TYPE_URL).await
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for SnapshotDiscoveryService {
    type StreamRoutesStream = SotwStream;
    type DeltaRoutesStream = DeltaStream;

    async fn stream_routes(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamRoutesStream>, Status> {
        Ok(Response::new(self.stream(request, ROUTE_TYPE_URL, "RDS")))
    }

    async fn delta_routes(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaRoutesStream>, Status> {
        Ok(Response::new(self.delta(request, ROUTE_TYPE_URL, "Delta-RDS")))
    }

    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, ROUTE_TYPE_URL).await
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for SnapshotDiscoveryService {
    type StreamEndpointsStream = SotwStream;
    type DeltaEndpointsStream = DeltaStream;

    async fn stream_endpoints(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamEndpointsStream>, Status> {
        Ok(Response::new(self.stream(request, ENDPOINT_TYPE_URL, "EDS")))
    }

    async fn delta_endpoints(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaEndpointsStream>, Status> {
        Ok(Response::new(self.delta(request, ENDPOINT_TYPE_URL, "Delta-EDS")))
    }

    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        self.fetch(request, ENDPOINT_TYPE_URL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::synthesizer::Synthesizer;
    use envoy_types::pb::envoy::config::core::v3::Node;

    fn service() -> SnapshotDiscoveryService {
        let state = Arc::new(XdsState::new("node"));
        state.update(Synthesizer::default().build("1", &[])).unwrap();
        SnapshotDiscoveryService::new(state)
    }

    fn fetch_request(type_url: &str) -> Request<DiscoveryRequest> {
        Request::new(DiscoveryRequest {
            type_url: type_url.to_string(),
            node: Some(Node { id: "node".to_string(), ..Default::default() }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn fetch_listeners_returns_http_listener() {
        let response = service().fetch_listeners(fetch_request("")).await.unwrap().into_inner();
        assert_eq!(response.type_url, LISTENER_TYPE_URL);
        assert_eq!(response.resources.len(), 1);
        assert_eq!(response.version_info, "1");
    }

    #[tokio::test]
    async fn fetch_rejects_foreign_type() {
        let status = service().fetch_routes(fetch_request(CLUSTER_TYPE_URL)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn fetch_without_snapshot_is_unavailable() {
        let service = SnapshotDiscoveryService::new(Arc::new(XdsState::new("node")));
        let status = service.fetch_clusters(fetch_request(CLUSTER_TYPE_URL)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
