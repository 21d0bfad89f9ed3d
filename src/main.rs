//! Feed Recovery Client
//!
//! Streams every record from the exchange, requests each missing sequence
//! individually, and writes the ordered result as JSON.
//!
//! Usage:
//!   feed-recovery --host 127.0.0.1 --port 3000 --output output.json
//!
//! Environment:
//!   RECOVERY_CONFIG_PATH - TOML config file (optional)
//!   RECOVERY_HOST / RECOVERY_PORT - Exchange address
//!   RECOVERY_OUTPUT - Output path (default: output.json)
//!   RUST_LOG - Log filter (default: feed_recovery=info)
//!
//! Exit status: 0 complete, 2 incomplete (output still written), 1 failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_recovery::recovery::{ResendRange, TcpConnectionProvider};
use feed_recovery::{OutputWriter, RecoveryConfig, RecoveryCoordinator};

#[derive(Parser, Debug)]
#[command(name = "feed-recovery")]
#[command(about = "Retrieve a complete, gap-free record sequence from the exchange")]
struct Args {
    /// TOML config file (overrides RECOVERY_CONFIG_PATH)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exchange host
    #[arg(long)]
    host: Option<String>,

    /// Exchange port
    #[arg(long)]
    port: Option<u16>,

    /// Output JSON path
    #[arg(long, env = "RECOVERY_OUTPUT")]
    output: Option<PathBuf>,

    /// Concurrent resend connections
    #[arg(long)]
    max_inflight: Option<usize>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Read timeout in milliseconds
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Send only the low byte for resend targets above 255
    #[arg(long, default_value = "false")]
    truncate_resend: bool,
}

impl Args {
    fn into_config(self) -> Result<RecoveryConfig> {
        let mut config = match &self.config {
            Some(path) => RecoveryConfig::load(path)?,
            None => RecoveryConfig::from_env()?,
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(n) = self.max_inflight {
            config.max_inflight_resends = n;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout_ms = ms;
        }
        if self.truncate_resend {
            config.resend_range = ResendRange::Truncate;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("Recovery failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let config = args.into_config()?;

    info!("Starting feed recovery");
    info!("  Exchange: {}:{}", config.host, config.port);
    info!("  Output: {}", config.output_path.display());
    info!("  Max inflight resends: {}", config.max_inflight_resends);

    let provider = Arc::new(TcpConnectionProvider::new(config.host.clone(), config.port));
    let coordinator = RecoveryCoordinator::new(provider, config.options());

    let outcome = coordinator
        .run()
        .await
        .context("initial stream from exchange failed")?;

    OutputWriter::new(&config.output_path).write(&outcome)?;

    if !outcome.complete {
        warn!(
            "Output is incomplete: {} of {} sequences present, {} missing in {} ranges",
            outcome.records.len(),
            outcome.highest_sequence,
            outcome.missing_count,
            outcome.missing.len()
        );
    }

    Ok(outcome.complete)
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feed_recovery=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
