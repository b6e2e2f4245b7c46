pub mod config;

use clap::{Parser, Subcommand};

/// Incident Sentinel — an AI-assisted Kubernetes incident triage and
/// remediation gateway.
#[derive(Debug, Parser)]
#[command(name = "incident-sentinel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Validate config and cluster reachability without starting the
    /// HTTP listener or the monitoring loop.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load configuration from the path named by the `INCIDENT_SENTINEL_CONFIG`
/// env var, defaulting to `config.toml`. Returns the parsed [`Config`] and
/// the path that was used. Shared by `serve`, `doctor`, and `config`.
pub fn load_config() -> anyhow::Result<(ki_domain::config::Config, String)> {
    let config_path = std::env::var("INCIDENT_SENTINEL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ki_domain::config::Config::default()
    };

    Ok((config, config_path))
}
