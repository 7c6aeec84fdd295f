//! Domain layer
//!
//! Pure domain entities with no infrastructure dependencies: the exposure
//! model and its identifiers.

pub mod exposure;
pub mod id;

pub use exposure::{hostname_domains, normalize_hostname, ContainerStatus, Exposure, Protocol, LOCAL_DOMAIN_SUFFIX};
pub use id::ExposureId;
