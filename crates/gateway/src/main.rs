mod api;
mod bootstrap;
mod cli;
mod runtime;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(config).await
        }
        Some(Command::Doctor) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_doctor(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing, exactly as the teacher's
/// `main.rs::init_tracing` does: `RUST_LOG`-driven env filter, JSON
/// formatter, defaulting to `info` with this crate at `debug`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ki_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway: build `AppState`, spawn the session sweeper and the
/// monitoring cycle scheduler, then serve the HTTP API until the process
/// is signaled to stop. Any failure in `build_app_state` is fatal before
/// the listener opens or an LLM call is ever made (§6, §8 scenario 6).
async fn run_server(config: ki_domain::config::Config) -> anyhow::Result<()> {
    tracing::info!("incident-sentinel starting");

    let state = bootstrap::build_app_state(config).await?;
    let state = Arc::new(state);

    bootstrap::spawn_background_tasks(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.host/server.port: {e}"))?;

    let app = api::router((*state).clone()).with_state((*state).clone());

    tracing::info!(%addr, "HTTP listener starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("incident-sentinel shut down cleanly");
    Ok(())
}

/// Validate config and cluster reachability without starting the HTTP
/// listener or the monitoring loop (§6 process surface) — wires up the
/// same `AppState` as `serve` and reports what would have failed boot.
async fn run_doctor(config: ki_domain::config::Config) -> anyhow::Result<()> {
    match bootstrap::build_app_state(config).await {
        Ok(state) => {
            println!("OK: cluster guard allow-list: {:?}", state.cluster_guard.allow_list());
            println!("OK: {} tool(s) registered", state.catalog.descriptors().len());
            println!(
                "OK: {} subagent profile(s) registered",
                state.agents.as_ref().map(|a| a.len()).unwrap_or(0)
            );
            if state.auth_required() {
                println!("OK: API key auth enabled ({} key(s))", state.api_key_hashes.len());
            } else {
                println!("WARN: API key auth disabled (dev mode)");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
