//! # edgeplane
//!
//! A host-local Envoy control plane. Operators declare exposures (bindings
//! from an application container port to an HTTP hostname or a TCP host
//! port); edgeplane persists them, wires the container onto the proxy's
//! network and serves the resulting Envoy configuration over xDS.
//!
//! ## Architecture
//!
//! ```text
//! REST API → Exposure Registry → Resource Synthesizer → xDS snapshot cache → Envoy
//!                 ↓        ↓
//!          state file   container runtime (network reconciliation)
//! ```

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod network;
pub mod observability;
pub mod registry;
pub mod runtime;
pub mod startup;
pub mod utils;
pub mod xds;

pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "edgeplane");
    }
}
