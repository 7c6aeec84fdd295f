use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::bootstrap::BootstrapParams;
use crate::observability::trace_http_requests;
use crate::registry::ExposureRegistry;

use super::{
    docs,
    handlers::{
        app_status_handler, create_exposure_handler, delete_app_exposures_handler,
        delete_exposure_handler, get_bootstrap_handler, get_exposure_handler, health_handler,
        list_app_exposures_handler, list_exposures_handler,
    },
};

#[derive(Debug, Clone)]
pub struct ApiState {
    pub registry: ExposureRegistry,
    pub bootstrap: BootstrapParams,
}

impl ApiState {
    pub fn new(registry: ExposureRegistry, bootstrap: BootstrapParams) -> Self {
        Self { registry, bootstrap }
    }
}

pub fn build_router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/api/v1/exposures", post(create_exposure_handler).get(list_exposures_handler))
        .route("/api/v1/exposures/{id}", get(get_exposure_handler).delete(delete_exposure_handler))
        .route(
            "/api/v1/apps/{app_id}/exposures",
            get(list_app_exposures_handler).delete(delete_app_exposures_handler),
        )
        .route("/api/v1/apps/{app_id}/status", get(app_status_handler))
        .route("/api/v1/bootstrap", get(get_bootstrap_handler))
        .with_state(state);

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .merge(docs::docs_router())
        .layer(middleware::from_fn(trace_http_requests))
        .layer(CorsLayer::permissive())
}
