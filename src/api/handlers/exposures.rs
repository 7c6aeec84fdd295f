//! Exposure HTTP handlers
//!
//! Create, list, fetch and delete exposures. Every response carries the live
//! container status next to the stored record.

use std::collections::{BTreeSet, HashMap};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::api::error::ApiError;
use crate::api::routes::ApiState;
use crate::domain::{ContainerStatus, Exposure, ExposureId, Protocol};
use crate::registry::{ExposureRegistry, NewExposure};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "app_id": "web",
    "protocol": "http",
    "hostname": "web.local",
    "container_port": 8080
}))]
pub struct CreateExposureBody {
    /// Application whose container is exposed (container name is `<app_id>-main`).
    #[validate(length(min = 1, max = 128), regex(path = *crate::utils::APP_ID_REGEX))]
    pub app_id: String,

    /// `http` (routed by hostname on the shared listener) or `tcp` (dedicated host port).
    #[schema(example = "http")]
    pub protocol: String,

    /// Hostname to route; required for `http`, ignored for `tcp`.
    #[serde(default)]
    #[validate(length(max = 253))]
    pub hostname: Option<String>,

    /// Port the container listens on.
    #[validate(range(min = 1, max = 65535))]
    pub container_port: u32,
}

impl CreateExposureBody {
    fn into_request(self) -> Result<NewExposure, ApiError> {
        let protocol: Protocol = self.protocol.parse()?;
        Ok(NewExposure {
            app_id: self.app_id,
            protocol,
            hostname: self.hostname.unwrap_or_default(),
            container_port: self.container_port,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExposureResponse {
    #[schema(example = "exp_3f9a0c1d2b4e5f60")]
    pub id: String,
    pub app_id: String,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub container_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    pub status: ContainerStatus,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl ExposureResponse {
    pub fn new(exposure: Exposure, status: ContainerStatus) -> Self {
        let (hostname, host_port) = match exposure.protocol {
            Protocol::Http => (Some(exposure.hostname), None),
            Protocol::Tcp => (None, Some(exposure.host_port)),
        };

        Self {
            id: exposure.id.into_string(),
            app_id: exposure.app_id,
            protocol: exposure.protocol,
            hostname,
            container_port: exposure.container_port,
            host_port,
            status,
            created_at: exposure.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExposureListResponse {
    pub exposures: Vec<ExposureResponse>,
}

pub(crate) async fn with_status(registry: &ExposureRegistry, exposure: Exposure) -> ExposureResponse {
    let status = registry.container_status(&exposure.app_id).await;
    ExposureResponse::new(exposure, status)
}

/// Looks up each distinct app's container once, with the lookups running
/// concurrently, then attaches the status to every exposure of that app.
pub(crate) async fn list_with_status(
    registry: &ExposureRegistry,
    exposures: Vec<Exposure>,
) -> ExposureListResponse {
    let apps: BTreeSet<String> = exposures.iter().map(|e| e.app_id.clone()).collect();

    let mut lookups = JoinSet::new();
    for app_id in apps {
        let registry = registry.clone();
        lookups.spawn(async move {
            let status = registry.container_status(&app_id).await;
            (app_id, status)
        });
    }

    let mut statuses = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok((app_id, status)) => {
                statuses.insert(app_id, status);
            }
            Err(e) => warn!(error = %e, "Container status lookup task failed"),
        }
    }

    let exposures = exposures
        .into_iter()
        .map(|exposure| {
            let status =
                statuses.get(&exposure.app_id).copied().unwrap_or(ContainerStatus::Unavailable);
            ExposureResponse::new(exposure, status)
        })
        .collect();
    ExposureListResponse { exposures }
}

fn parse_id(id: &str) -> Result<ExposureId, ApiError> {
    ExposureId::parse(id).map_err(|_| ApiError::NotFound(format!("exposure '{}' not found", id)))
}

#[utoipa::path(
    post,
    path = "/api/v1/exposures",
    request_body = CreateExposureBody,
    responses(
        (status = 201, description = "Exposure created", body = ExposureResponse),
        (status = 200, description = "Identical exposure already existed", body = ExposureResponse),
        (status = 400, description = "Validation error", body = crate::api::error::ErrorBody),
        (status = 404, description = "Container not found", body = crate::api::error::ErrorBody),
        (status = 409, description = "Hostname already exposed", body = crate::api::error::ErrorBody),
        (status = 503, description = "TCP port pool exhausted", body = crate::api::error::ErrorBody)
    ),
    tag = "Exposures"
)]
#[instrument(skip(state, payload), fields(app_id = %payload.app_id, protocol = %payload.protocol))]
pub async fn create_exposure_handler(
    State(state): State<ApiState>,
    Json(payload): Json<CreateExposureBody>,
) -> Result<(StatusCode, Json<ExposureResponse>), ApiError> {
    payload.validate()?;
    let request = payload.into_request()?;

    let (exposure, created) = state.registry.create(request).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((status, Json(with_status(&state.registry, exposure).await)))
}

#[utoipa::path(
    get,
    path = "/api/v1/exposures",
    responses((status = 200, description = "All exposures", body = ExposureListResponse)),
    tag = "Exposures"
)]
#[instrument(skip(state))]
pub async fn list_exposures_handler(
    State(state): State<ApiState>,
) -> Result<Json<ExposureListResponse>, ApiError> {
    let exposures = state.registry.list().await;
    Ok(Json(list_with_status(&state.registry, exposures).await))
}

#[utoipa::path(
    get,
    path = "/api/v1/exposures/{id}",
    params(("id" = String, Path, description = "Exposure id")),
    responses(
        (status = 200, description = "Exposure", body = ExposureResponse),
        (status = 404, description = "Exposure not found", body = crate::api::error::ErrorBody)
    ),
    tag = "Exposures"
)]
#[instrument(skip(state), fields(exposure_id = %id))]
pub async fn get_exposure_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ExposureResponse>, ApiError> {
    let exposure = state.registry.get(&parse_id(&id)?).await?;
    Ok(Json(with_status(&state.registry, exposure).await))
}

#[utoipa::path(
    delete,
    path = "/api/v1/exposures/{id}",
    params(("id" = String, Path, description = "Exposure id")),
    responses(
        (status = 204, description = "Exposure deleted"),
        (status = 404, description = "Exposure not found", body = crate::api::error::ErrorBody)
    ),
    tag = "Exposures"
)]
#[instrument(skip(state), fields(exposure_id = %id))]
pub async fn delete_exposure_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
