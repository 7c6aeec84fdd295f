//! Startup sequence for the edgeplane control plane
//!
//! Builds the container runtime, opens the exposure registry (which publishes
//! the first snapshot), then runs the xDS server, the management API and the
//! republish loop side by side until a shutdown signal arrives.

use std::sync::Arc;

use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{start_api_server, ApiState};
use crate::bootstrap::BootstrapParams;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::observability::log_config_info;
use crate::registry::ExposureRegistry;
use crate::runtime::build_runtime;
use crate::xds::{start_xds_server, XdsState};
use crate::{APP_NAME, VERSION};

/// Run every control plane service until Ctrl-C.
pub async fn run_server(config: AppConfig) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal, shutting down"),
        }
        signal_token.cancel();
    });

    run_with_shutdown(config, shutdown).await
}

/// Run every control plane service until `shutdown` is cancelled.
pub async fn run_with_shutdown(config: AppConfig, shutdown: CancellationToken) -> Result<()> {
    info!(app_name = APP_NAME, version = VERSION, "Starting edgeplane control plane");
    log_config_info(&config);

    let runtime = build_runtime(&config.runtime);
    let xds_state = Arc::new(XdsState::new(config.proxy.node_id.clone()));
    let registry = ExposureRegistry::open(&config, runtime, xds_state.clone()).await?;

    let api_state = ApiState::new(registry.clone(), BootstrapParams::from_config(&config));

    let xds_task = start_xds_server(xds_state, &config.xds, shutdown.clone().cancelled_owned());
    let api_task = start_api_server(&config.api, api_state, shutdown.clone().cancelled_owned());
    let republish_task = registry.run_republish_loop(
        config.registry.republish_interval(),
        shutdown.clone().cancelled_owned(),
    );

    if let Err(e) = try_join!(xds_task, api_task, republish_task) {
        error!(error = %e, "Control plane services terminated with error");
        shutdown.cancel();
        return Err(e);
    }

    info!("Control plane shutdown completed");
    Ok(())
}
