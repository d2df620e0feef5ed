//! Roundtable API server binary.
//!
//! Usage:
//!   roundtable-api --config roundtable.toml
//!   roundtable-api --port 8080
//!   roundtable-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `ROUNDTABLE_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `ROUNDTABLE_CORS_ORIGINS` - CORS allowed origins (comma-separated)
//! - `GITHUB_TOKEN` / `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` - provider credentials
//! - `GITHUB_REPO` - `owner/name` repository for the backlog tools
//! - `{AGENT_KEY}_GITHUB_TOKEN` - per-agent token for the backlog tools (e.g. `ANALYST_GITHUB_TOKEN`)
//! - `RUST_LOG` - log filter

use anyhow::Context;
use roundtable_api::{AppState, serve};
use roundtable_coordinator::CoordinatorConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "Roundtable API Server

Usage: roundtable-api [OPTIONS]

Options:
  -p, --port <PORT>        Port to listen on (default: 8080)
  -b, --bind <ADDR>        Bind address (default: 127.0.0.1, env: ROUNDTABLE_BIND_ADDR)
  -c, --config <FILE>      Path to roundtable.toml
  -h, --help               Show this help message

Environment variables:
  ROUNDTABLE_BIND_ADDR     Server bind address (overridden by --bind flag)
  ROUNDTABLE_CORS_ORIGINS  CORS allowed origins (comma-separated, default: any)
  GITHUB_TOKEN             Token for the default GitHub Models provider
  GITHUB_REPO              Repository for the backlog tools (owner/name)
  <AGENT>_GITHUB_TOKEN     Per-agent token for the backlog tools";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,roundtable_api=debug,roundtable_coordinator=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: u16 = 8080;
    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(value) = args.get(i + 1) {
                    port = value
                        .parse()
                        .with_context(|| format!("Invalid port number: {value}"))?;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if let Some(value) = args.get(i + 1) {
                    config_path = Some(value.clone());
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if let Some(value) = args.get(i + 1) {
                    bind_addr = Some(value.clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => tracing::warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let host = bind_addr
        .or_else(|| std::env::var("ROUNDTABLE_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0; the API has no authentication and is now reachable \
             from all network interfaces."
        );
    }

    let cors_origins: Option<Vec<String>> = std::env::var("ROUNDTABLE_CORS_ORIGINS")
        .ok()
        .map(|s| s.split(',').map(|o| o.trim().to_string()).collect());

    let config = if let Some(path) = config_path {
        tracing::info!(path = %path, "Loading configuration");
        CoordinatorConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        CoordinatorConfig::default()
    };

    let state = AppState::new(config).context("Failed to initialize coordinator")?;

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    serve(Arc::new(state), addr, cors_origins).await?;

    Ok(())
}
