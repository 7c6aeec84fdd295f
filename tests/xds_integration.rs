//! Drives the discovery server over a real gRPC connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edgeplane::config::XdsConfig;
use edgeplane::domain::{Exposure, ExposureId, Protocol};
use edgeplane::xds::resources::{CLUSTER_TYPE_URL, LISTENER_TYPE_URL};
use edgeplane::xds::{start_xds_server, Synthesizer, XdsState};
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_client::ClusterDiscoveryServiceClient;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use prost::Message;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Streaming;

const NODE: &str = "zeropoint-node";
const WAIT: Duration = Duration::from_secs(5);

struct RunningServer {
    state: Arc<XdsState>,
    endpoint: String,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<edgeplane::Result<()>>,
}

async fn start_server() -> RunningServer {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = XdsConfig { bind_address: "127.0.0.1".to_string(), port };

    let state = Arc::new(XdsState::new(NODE));
    state.update(Synthesizer::default().build(&state.next_version(), &[])).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let state = state.clone();
        let signal = shutdown.clone().cancelled_owned();
        async move { start_xds_server(state, &config, signal).await }
    });

    RunningServer { state, endpoint: format!("http://127.0.0.1:{port}"), shutdown, handle }
}

async fn connect_channel(endpoint: &str) -> Channel {
    for _ in 0..50 {
        if let Ok(channel) = Channel::from_shared(endpoint.to_string()).unwrap().connect().await {
            return channel;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("discovery server at {endpoint} never came up");
}

fn request(type_url: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        type_url: type_url.to_string(),
        node: Some(Node { id: NODE.to_string(), ..Default::default() }),
        ..Default::default()
    }
}

fn ack(type_url: &str, response: &DiscoveryResponse) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: response.version_info.clone(),
        response_nonce: response.nonce.clone(),
        ..request(type_url)
    }
}

async fn next(stream: &mut Streaming<DiscoveryResponse>) -> DiscoveryResponse {
    timeout(WAIT, stream.message()).await.expect("timed out waiting for push").unwrap().unwrap()
}

fn listener_names(response: &DiscoveryResponse) -> Vec<String> {
    response
        .resources
        .iter()
        .map(|any| Listener::decode(any.value.as_slice()).unwrap().name)
        .collect()
}

fn tcp_exposure() -> Exposure {
    Exposure {
        id: ExposureId::from_string("exp_0123456789abcdef".to_string()),
        app_id: "db".to_string(),
        protocol: Protocol::Tcp,
        hostname: String::new(),
        container_port: 5432,
        host_port: 10000,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn ads_stream_receives_initial_listeners_and_later_pushes() {
    let server = start_server().await;
    let mut client = AggregatedDiscoveryServiceClient::new(connect_channel(&server.endpoint).await);

    let (tx, rx) = mpsc::channel(8);
    tx.send(request(LISTENER_TYPE_URL)).await.unwrap();
    let mut responses =
        client.stream_aggregated_resources(ReceiverStream::new(rx)).await.unwrap().into_inner();

    let first = next(&mut responses).await;
    assert_eq!(first.type_url, LISTENER_TYPE_URL);
    assert_eq!(first.version_info, "1");
    assert!(!first.nonce.is_empty());
    assert_eq!(listener_names(&first), vec!["http_listener".to_string()]);
    tx.send(ack(LISTENER_TYPE_URL, &first)).await.unwrap();

    let version = server.state.next_version();
    server.state.update(Synthesizer::default().build(&version, &[tcp_exposure()])).unwrap();

    let pushed = next(&mut responses).await;
    assert_eq!(pushed.type_url, LISTENER_TYPE_URL);
    assert_eq!(pushed.version_info, version);
    assert_ne!(pushed.nonce, first.nonce);
    assert_eq!(
        listener_names(&pushed),
        vec!["http_listener".to_string(), "tcp_listener_exp_0123456789abcdef".to_string()]
    );

    server.shutdown.cancel();
    let ended = timeout(WAIT, responses.message()).await.expect("stream did not close on shutdown");
    assert!(!matches!(ended, Ok(Some(_))));
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn typed_cluster_fetch_returns_current_snapshot() {
    let server = start_server().await;
    let version = server.state.next_version();
    server.state.update(Synthesizer::default().build(&version, &[tcp_exposure()])).unwrap();

    let mut client = ClusterDiscoveryServiceClient::new(connect_channel(&server.endpoint).await);
    let response = client.fetch_clusters(request(CLUSTER_TYPE_URL)).await.unwrap().into_inner();

    assert_eq!(response.type_url, CLUSTER_TYPE_URL);
    assert_eq!(response.version_info, version);
    assert_eq!(response.resources.len(), 1);

    server.shutdown.cancel();
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();
}
