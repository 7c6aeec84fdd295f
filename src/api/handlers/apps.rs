//! Per-application views over the exposure registry

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use super::exposures::{list_with_status, ExposureListResponse};
use crate::api::error::ApiError;
use crate::api::routes::ApiState;
use crate::domain::ContainerStatus;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AppStatusResponse {
    pub app_id: String,
    pub status: ContainerStatus,
}

#[utoipa::path(
    get,
    path = "/api/v1/apps/{app_id}/exposures",
    params(("app_id" = String, Path, description = "Application id")),
    responses((status = 200, description = "Exposures of the app", body = ExposureListResponse)),
    tag = "Apps"
)]
#[instrument(skip(state))]
pub async fn list_app_exposures_handler(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<Json<ExposureListResponse>, ApiError> {
    let exposures = state.registry.list_by_app(&app_id).await;
    Ok(Json(list_with_status(&state.registry, exposures).await))
}

#[utoipa::path(
    delete,
    path = "/api/v1/apps/{app_id}/exposures",
    params(("app_id" = String, Path, description = "Application id")),
    responses(
        (status = 204, description = "Every exposure of the app deleted"),
        (status = 404, description = "App has no exposures", body = crate::api::error::ErrorBody)
    ),
    tag = "Apps"
)]
#[instrument(skip(state))]
pub async fn delete_app_exposures_handler(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_by_app(&app_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/apps/{app_id}/status",
    params(("app_id" = String, Path, description = "Application id")),
    responses((status = 200, description = "Live container status", body = AppStatusResponse)),
    tag = "Apps"
)]
#[instrument(skip(state))]
pub async fn app_status_handler(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Json<AppStatusResponse> {
    let status = state.registry.container_status(&app_id).await;
    Json(AppStatusResponse { app_id, status })
}
