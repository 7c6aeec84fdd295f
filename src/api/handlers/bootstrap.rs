//! Envoy bootstrap download

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::routes::ApiState;
use crate::bootstrap::{render_bootstrap, BootstrapQuery};

#[utoipa::path(
    get,
    path = "/api/v1/bootstrap",
    params(BootstrapQuery),
    responses(
        (status = 200, description = "Envoy bootstrap YAML", content_type = "application/yaml", body = String),
        (status = 400, description = "Invalid parameters", body = crate::api::error::ErrorBody)
    ),
    tag = "Bootstrap"
)]
#[instrument(skip(state))]
pub async fn get_bootstrap_handler(
    State(state): State<ApiState>,
    Query(query): Query<BootstrapQuery>,
) -> Result<Response, ApiError> {
    let params = state.bootstrap.clone().with_xds_address(query.xds_host, query.xds_port);
    let yaml = render_bootstrap(&params)?;

    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml).into_response())
}
