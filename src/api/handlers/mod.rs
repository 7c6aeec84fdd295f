//! HTTP request handlers organized by resource type

pub mod apps;
pub mod bootstrap;
pub mod exposures;
pub mod health;

pub use apps::{app_status_handler, delete_app_exposures_handler, list_app_exposures_handler};
pub use bootstrap::get_bootstrap_handler;
pub use exposures::{
    create_exposure_handler, delete_exposure_handler, get_exposure_handler,
    list_exposures_handler, CreateExposureBody, ExposureListResponse, ExposureResponse,
};
pub use health::health_handler;
