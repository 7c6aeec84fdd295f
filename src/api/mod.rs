//! # REST API Components
//!
//! Management API for exposures: axum routing, handlers, error mapping and
//! the OpenAPI document served by Swagger UI.

pub mod docs;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
