//! # Command Line Interface
//!
//! `edgeplane serve` runs the control plane; `edgeplane bootstrap` prints the
//! Envoy bootstrap document that points the proxy at it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::bootstrap::{render_bootstrap, BootstrapParams};
use crate::config::AppConfig;
use crate::observability::init_observability;
use crate::startup::run_server;

#[derive(Debug, Parser)]
#[command(name = "edgeplane")]
#[command(about = "Host-local Envoy control plane for application exposures")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Directory holding the persisted exposures
    #[arg(long, global = true)]
    pub state_dir: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the control plane server (default)
    Serve,

    /// Print the Envoy bootstrap document
    Bootstrap {
        /// Discovery server host the proxy should dial
        #[arg(long)]
        xds_host: Option<String>,

        /// Discovery server port the proxy should dial
        #[arg(long)]
        xds_port: Option<u16>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Apply command line overrides on top of the environment configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) -> crate::Result<()> {
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.registry.state_dir = dir.clone();
        }
        config.validate()
    }
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    cli.apply_overrides(&mut config).context("Invalid command line override")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_observability(&config.observability)
                .await
                .context("Failed to initialize observability")?;
            run_server(config).await?;
        }

        Commands::Bootstrap { xds_host, xds_port, output } => {
            let params = BootstrapParams::from_config(&config).with_xds_address(xds_host, xds_port);
            let yaml = render_bootstrap(&params)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, yaml)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Wrote Envoy bootstrap to {}", path.display());
                }
                None => print!("{}", yaml),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["edgeplane"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "edgeplane",
            "serve",
            "--log-level",
            "debug",
            "--state-dir",
            "/tmp/edgeplane-state",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.registry.state_dir, "/tmp/edgeplane-state");
    }

    #[test]
    fn bootstrap_flags_parse() {
        let cli = Cli::try_parse_from([
            "edgeplane",
            "bootstrap",
            "--xds-host",
            "10.0.0.2",
            "--xds-port",
            "18001",
            "-o",
            "envoy.yaml",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Bootstrap { xds_host, xds_port, output }) => {
                assert_eq!(xds_host.as_deref(), Some("10.0.0.2"));
                assert_eq!(xds_port, Some(18001));
                assert_eq!(output, Some(PathBuf::from("envoy.yaml")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn empty_state_dir_override_is_rejected() {
        let cli = Cli::try_parse_from(["edgeplane", "--state-dir", ""]).unwrap();
        let mut config = AppConfig::default();
        assert!(cli.apply_overrides(&mut config).is_err());
    }
}
