//! # Huddle
//!
//! Console front end for Huddle sessions.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with custom config
//! huddle --config /path/to/huddle.toml
//!
//! # Override settings with environment variables
//! HUDDLE__DOMAIN_ID=3 HUDDLE__SESSION__AUTO_ANNOUNCE=false huddle
//! ```

mod config;
mod console;
mod metrics;

use anyhow::{bail, Context, Result};
use console::{Console, Flow};
use huddle_bus::Domain;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "Usage: huddle [--config <path>]";

/// Wait for buffered output before exiting.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

fn parse_args() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("Unknown argument `{other}`\n{USAGE}"),
        }
    }
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout belongs to the console
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=info,huddle_core=info,huddle_bus=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config_path = parse_args()?;
    let config = config::Config::load(config_path.as_deref())?;

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let domain = Domain::with_qos(config.domain_id, config.qos_library());
    tracing::info!(domain = domain.id(), "Starting Huddle console");

    let (mut console, mut output) = Console::new(domain, config);
    let printer = tokio::spawn(async move {
        while let Some(line) = output.recv().await {
            println!("{line}");
        }
    });

    console.handle_line("help").await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                if console.handle_line(&line).await == Flow::Quit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    console.shutdown().await;
    drop(console);
    let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, printer).await;

    Ok(())
}
