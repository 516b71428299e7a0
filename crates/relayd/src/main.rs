//! relayd - content-agnostic message relay daemon
//!
//! Reads a TOML configuration describing listener and forwarder
//! instances, wires every listener to every forwarder through the
//! routing fabric, and serves its own counters over HTTP.
//!
//! ```bash
//! relayd --config /etc/relayd.toml
//! relayd --config relayd.toml --log-level debug
//! ```

mod daemon;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_config::Config;

/// Content-agnostic message relay daemon
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/relayd.toml")]
    config: std::path::PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.clone());
    init_logging(&level)?;

    tracing::info!(config = %cli.config.display(), "relayd starting");
    daemon::run(config).await
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
