use std::pin::Pin;
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::info;

use super::responses::{delta_responder, sotw_responder};
use super::stream::{run_delta_loop, run_stream_loop};
use crate::xds::state::XdsState;

/// Aggregated Discovery Service backed by the snapshot cache
#[derive(Debug, Clone)]
pub struct SnapshotAggregatedDiscoveryService {
    state: Arc<XdsState>,
}

impl SnapshotAggregatedDiscoveryService {
    pub fn new(state: Arc<XdsState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for SnapshotAggregatedDiscoveryService {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(remote_addr = ?request.remote_addr(), "New ADS stream connection established");

        let stream =
            run_stream_loop(self.state.clone(), request.into_inner(), sotw_responder, "ADS", None);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        info!(remote_addr = ?request.remote_addr(), "Delta ADS stream connection established");

        let stream = run_delta_loop(
            self.state.clone(),
            request.into_inner(),
            delta_responder,
            "Delta-ADS",
            None,
        );
        Ok(Response::new(Box::pin(stream)))
    }
}
