use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health::health_handler,
        crate::api::handlers::exposures::create_exposure_handler,
        crate::api::handlers::exposures::list_exposures_handler,
        crate::api::handlers::exposures::get_exposure_handler,
        crate::api::handlers::exposures::delete_exposure_handler,
        crate::api::handlers::apps::list_app_exposures_handler,
        crate::api::handlers::apps::delete_app_exposures_handler,
        crate::api::handlers::apps::app_status_handler,
        crate::api::handlers::bootstrap::get_bootstrap_handler
    ),
    components(
        schemas(
            crate::api::handlers::health::HealthResponse,
            crate::api::handlers::exposures::CreateExposureBody,
            crate::api::handlers::exposures::ExposureResponse,
            crate::api::handlers::exposures::ExposureListResponse,
            crate::api::handlers::apps::AppStatusResponse,
            crate::api::error::ErrorBody,
            crate::domain::Protocol,
            crate::domain::ContainerStatus
        )
    ),
    tags(
        (name = "Exposures", description = "HTTP and TCP exposures of application containers"),
        (name = "Apps", description = "Per-application exposure views and container status"),
        (name = "Bootstrap", description = "Envoy bootstrap document"),
        (name = "health", description = "Liveness")
    ),
    info(
        title = "edgeplane API",
        description = "Management API of the host-local Envoy control plane"
    )
)]
pub struct ApiDoc;

pub fn docs_router() -> Router {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_exposure_routes() {
        let openapi = ApiDoc::openapi();
        let paths: Vec<&String> = openapi.paths.paths.keys().collect();

        for expected in [
            "/api/v1/exposures",
            "/api/v1/exposures/{id}",
            "/api/v1/apps/{app_id}/exposures",
            "/api/v1/apps/{app_id}/status",
            "/api/v1/bootstrap",
            "/health",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {expected}");
        }

        let schemas = openapi.components.as_ref().map(|c| c.schemas.clone()).unwrap_or_default();
        assert!(schemas.contains_key("CreateExposureBody"));
        assert!(schemas.contains_key("ExposureResponse"));
    }
}
