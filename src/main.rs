//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the dashboard server and the polling client.
//!
//! ## Subcommands
//!
//! - `dashboard`: serve the panel API over the result store.
//! - `watch`: poll a running dashboard and print what changes.
//! - `check-config`: validate a config file and print the effective values.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection for the result store.
//! - `--config` / `RAPD_PANEL_CONFIG`: optional TOML file (see [`rapd_panel::config`]).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "rapd-panel", about = "Control panel service for the RAPD pipeline")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Panel configuration file (TOML)
    #[arg(long, env = "RAPD_PANEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the panel API
    Dashboard {
        /// Listen port (overrides [server].port)
        #[arg(long)]
        port: Option<u16>,
        /// Directory with the static frontend to serve at /
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Poll a running dashboard and print result, process, cloud and status changes
    Watch {
        /// Dashboard base URL
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        /// Data root directory to follow
        #[arg(long)]
        datadir: String,
        /// Beamline whose heartbeats to follow
        #[arg(long)]
        beamline: String,
        /// Address reported to the cloud endpoint
        #[arg(long, default_value = "127.0.0.1")]
        ip_address: String,
        /// Print one JSON object per event instead of text
        #[arg(long)]
        json: bool,
        /// A download was requested: poll the cloud stream at the faster
        /// cadence until it arrives
        #[arg(long)]
        await_download: bool,
    },
    /// Validate the configuration file and print the effective settings
    CheckConfig,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let config = rapd_panel::config::PanelConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Dashboard { port, static_dir } => {
            let database_url = cli.database_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
            })?;
            cli::run_dashboard(database_url, config, *port, static_dir.as_deref())
        }
        Commands::Watch {
            server,
            datadir,
            beamline,
            ip_address,
            json,
            await_download,
        } => {
            let target = rapd_panel::poller::PollTarget {
                server: server.clone(),
                datadir: datadir.clone(),
                beamline: beamline.clone(),
                ip_address: ip_address.clone(),
            };
            cli::run_watch(target, config, *json, *await_download)
        }
        Commands::CheckConfig => cli::check_config(&config),
    }
}
