//! rolecall - Usage metering and entitlement server

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rolecall_core::config::default_data_dir;
use rolecall_core::{MeterConfig, MeterService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rolecall",
    version,
    about = "Usage metering, entitlements and live updates for rolecall",
    long_about = "Tracks roleplay session usage, resolves daily entitlements across\n\
                  subscription tiers and enterprise organizations, and pushes changes\n\
                  to connected clients over long-poll.\n\
                  \n\
                  Examples:\n\
                    rolecall                              # Run the HTTP server (default)\n\
                    rolecall serve --port 8080            # Custom port\n\
                    rolecall entitlements <user-id>       # Print a user's entitlements\n\
                    rolecall history <user-id> -n 5       # Last 5 billed sessions\n\
                    rolecall renewal <user-id>            # Current billing period\n\
                  \n\
                  Environment Variables:\n\
                    ROLECALL_CONFIG                       # TOML config file\n\
                    ROLECALL_DATA                         # Database file\n\
                    ROLECALL_FORMAT                       # Force output format: json|table\n\
                    ROLECALL_NO_COLOR                     # Disable ANSI colors\n\
                    RUST_LOG                              # Log filter (default: info)"
)]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// TOML config file (default: <data dir>/rolecall/rolecall.toml if present)
    #[arg(long, env = "ROLECALL_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(long, env = "ROLECALL_DATA")]
    data: Option<PathBuf>,

    /// Billing increment in seconds, overrides the config
    #[arg(long, env = "ROLECALL_BILLING_INCREMENT")]
    billing_increment: Option<i64>,

    /// Force output format (json|table)
    #[arg(long, env = "ROLECALL_FORMAT", value_parser = ["json", "table"])]
    format: Option<String>,

    /// Disable ANSI colors (log-friendly)
    #[arg(long, env = "ROLECALL_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the HTTP server (default)
    Serve {
        /// Address to bind
        #[arg(long, env = "ROLECALL_BIND")]
        bind: Option<String>,
        /// Port for the HTTP server
        #[arg(long, env = "ROLECALL_PORT")]
        port: Option<u16>,
    },
    /// Print a user's current entitlements
    Entitlements {
        user_id: String,
    },
    /// Show a user's billed sessions, newest first
    History {
        user_id: String,
        /// Max rows
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Show a user's billing period and next renewal
    Renewal {
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(data) = cli.data {
        config.data_path = data;
    }
    if let Some(increment) = cli.billing_increment {
        config.billing_increment_seconds = increment;
    }

    let json = cli.format.as_deref() == Some("json");
    let no_color = cli.no_color;

    match cli.mode.unwrap_or(Mode::Serve {
        bind: None,
        port: None,
    }) {
        Mode::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_serve(config).await?;
        }
        Mode::Entitlements { user_id } => {
            let service = open_service(config)?;
            let snapshot = service
                .entitlements(&user_id, Utc::now())
                .await
                .with_context(|| format!("Failed to resolve entitlements for {}", user_id))?;
            println!("{}", cli::format_entitlements(&snapshot, json, no_color));
        }
        Mode::History { user_id, limit } => {
            let service = open_service(config)?;
            let history = service
                .usage_history(&user_id)
                .with_context(|| format!("Failed to load history for {}", user_id))?;
            println!("{}", cli::format_history(&history, limit, json, no_color));
        }
        Mode::Renewal { user_id } => {
            let service = open_service(config)?;
            let renewal = service
                .renewal(&user_id, Utc::now())
                .with_context(|| format!("Failed to compute renewal for {}", user_id))?;
            println!("{}", cli::format_renewal(&renewal, json));
        }
    }

    Ok(())
}

/// Explicit file, else the default location if it exists, else defaults
fn load_config(path: Option<&std::path::Path>) -> Result<MeterConfig> {
    if let Some(path) = path {
        return MeterConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default_path = default_data_dir().join("rolecall.toml");
    if default_path.exists() {
        return MeterConfig::load(&default_path)
            .with_context(|| format!("Failed to load config from {}", default_path.display()));
    }
    Ok(MeterConfig::default())
}

fn open_service(config: MeterConfig) -> Result<MeterService> {
    let path = config.data_path.clone();
    MeterService::open(config)
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

async fn run_serve(config: MeterConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.bind_address, config.port
            )
        })?;

    let service = Arc::new(open_service(config)?);
    let health = service.health();
    info!(
        users = health.users,
        orgs = health.orgs,
        sessions = health.sessions,
        increment = service.config().billing_increment_seconds,
        "Database loaded"
    );

    rolecall_web::run(service, addr).await
}
