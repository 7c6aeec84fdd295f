//! Docker Engine API client over the local unix socket.
//!
//! Each call opens a fresh HTTP/1 connection on the socket; the control plane
//! issues a handful of calls per mutation so pooling buys nothing.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use tokio::net::UnixStream;
use tracing::{debug, instrument};

use super::{ContainerInfo, ContainerRuntime, NetworkInfo};
use crate::errors::{Error, Result};

/// Container runtime backed by the Docker Engine API
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    socket_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct NetworkSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateNetworkResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Raw reply from the engine
struct EngineResponse {
    status: StatusCode,
    body: Bytes,
}

impl EngineResponse {
    /// Engine error text, falling back to the raw body.
    fn message(&self) -> String {
        serde_json::from_slice::<ErrorMessage>(&self.body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.body).trim().to_string())
    }

    fn into_error(self, operation: &str) -> Error {
        Error::runtime(format!("{} failed with {}: {}", operation, self.status, self.message()))
    }
}

impl DockerRuntime {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<EngineResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::runtime(format!(
                "Failed to connect to Docker socket {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::runtime(format!("Docker HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Docker connection closed");
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value)?),
            None => Bytes::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, "docker")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| Error::internal(format!("Failed to build Docker request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Error::runtime(format!("Docker request {} failed: {}", path, e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::runtime(format!("Failed to read Docker response: {}", e)))?
            .to_bytes();

        debug!(path = %path, status = %status, bytes = body.len(), "Docker API call completed");
        Ok(EngineResponse { status, body })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self))]
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let response = self.request(Method::GET, &format!("/containers/{}/json", name), None).await?;

        match response.status {
            StatusCode::OK => {
                let inspect: InspectResponse = serde_json::from_slice(&response.body)?;
                Ok(Some(ContainerInfo {
                    id: inspect.id,
                    name: inspect.name.trim_start_matches('/').to_string(),
                    status: inspect.state.status,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(response.into_error("container inspect")),
        }
    }

    #[instrument(skip(self))]
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>> {
        let response = self.request(Method::GET, "/networks", None).await?;
        if response.status != StatusCode::OK {
            return Err(response.into_error("network list"));
        }

        let networks: Vec<NetworkSummary> = serde_json::from_slice(&response.body)?;
        Ok(networks.into_iter().map(|n| NetworkInfo { id: n.id, name: n.name }).collect())
    }

    #[instrument(skip(self))]
    async fn create_network(&self, name: &str, driver: &str) -> Result<String> {
        let body = json!({ "Name": name, "Driver": driver, "CheckDuplicate": true });
        let response = self.request(Method::POST, "/networks/create", Some(body)).await?;

        match response.status {
            StatusCode::OK | StatusCode::CREATED => {
                let created: CreateNetworkResponse = serde_json::from_slice(&response.body)?;
                Ok(created.id)
            }
            _ => Err(response.into_error("network create")),
        }
    }

    #[instrument(skip(self))]
    async fn connect_network(&self, network_id: &str, container: &str) -> Result<()> {
        let body = json!({ "Container": container });
        let response = self
            .request(Method::POST, &format!("/networks/{}/connect", network_id), Some(body))
            .await?;

        if response.status.is_success() {
            Ok(())
        } else {
            Err(response.into_error("network connect"))
        }
    }
}
