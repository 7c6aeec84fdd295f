//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Provides the gRPC server implementing Envoy's discovery protocols:
//! - ADS (Aggregated Discovery Service), state-of-the-world and delta
//! - CDS, LDS, RDS and EDS as single-type services
//!
//! Resources are served from the snapshot cache in [`state`], fed by the
//! [`synthesizer`] that turns exposures into Envoy configuration.

pub mod cluster;
pub mod listener;
pub mod resources;
pub mod route;
pub mod services;
pub mod snapshot;
pub mod state;
pub mod synthesizer;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use tonic::transport::Server;
use tracing::info;

use crate::config::XdsConfig;
use crate::Result;

pub use cluster::{ClusterConfig, ClusterDiscovery, EndpointConfig, LoadAssignmentConfig, LoadBalancingPolicy};
pub use listener::{ListenerConfig, ListenerFilter};
pub use route::{RouteActionConfig, RouteConfig, RouteRule, VirtualHostConfig};
pub use services::{SnapshotAggregatedDiscoveryService, SnapshotDiscoveryService};
pub use snapshot::ConfigurationSnapshot;
pub use state::{NodeSnapshot, ResourceUpdate, XdsState};
pub use synthesizer::{Synthesizer, SynthesizerSettings};

/// Start the xDS gRPC server and serve until `shutdown_signal` resolves.
///
/// Open discovery streams are closed through the state's shutdown token once
/// the signal fires.
pub async fn start_xds_server<F>(
    state: Arc<XdsState>,
    config: &XdsConfig,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .socket_address()
        .parse()
        .map_err(|e| crate::Error::config(format!("Invalid xDS address: {}", e)))?;

    info!(address = %addr, node_id = %state.node_id(), "Starting Envoy xDS server");

    let ads_service = SnapshotAggregatedDiscoveryService::new(state.clone());
    let typed_service = SnapshotDiscoveryService::new(state.clone());

    let token = state.shutdown_token();
    let shutdown = async move {
        shutdown_signal.await;
        info!("xDS server shutting down, closing discovery streams");
        token.cancel();
    };

    let server = Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(ads_service))
        .add_service(ClusterDiscoveryServiceServer::new(typed_service.clone()))
        .add_service(ListenerDiscoveryServiceServer::new(typed_service.clone()))
        .add_service(RouteDiscoveryServiceServer::new(typed_service.clone()))
        .add_service(EndpointDiscoveryServiceServer::new(typed_service))
        .serve_with_shutdown(addr, shutdown);

    info!("xDS server listening on {}", addr);

    server.await.map_err(|e| {
        let error_msg = e.to_string();
        if error_msg.contains("Address already in use") || error_msg.contains("bind") {
            crate::Error::transport(format!(
                "xDS server failed to bind to {}: port {} is already in use",
                addr,
                addr.port()
            ))
        } else {
            crate::Error::transport(format!("xDS server failed: {}", e))
        }
    })?;

    Ok(())
}
