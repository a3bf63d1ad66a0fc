//! `tos-mediator` binary: loads a configuration, runs every configured
//! controller on an in-process bus and prints the manager report
//! periodically until a termination signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tos_mediator::{Manager, MediatorConfig, MediatorError, MemoryBus, wait_for_shutdown_signal};

#[derive(Debug, Parser)]
#[command(name = "tos-mediator", version, about)]
struct Args {
    /// Path of the TOML configuration.
    #[arg(short, long, default_value = "mediator.toml")]
    config: PathBuf,

    /// Seconds between two status reports (0 disables them).
    #[arg(long, default_value_t = 60)]
    report_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MediatorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if config.is_empty() {
        return Err(MediatorError::NoConfiguration.into());
    }

    let mut manager = Manager::new(config, Arc::new(MemoryBus::default()));
    manager.start().await;
    info!("mediator started\n{manager}");

    let signal = wait_for_shutdown_signal();
    tokio::pin!(signal);
    if args.report_interval_secs == 0 {
        signal.await.context("installing signal handlers")?;
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(args.report_interval_secs));
        ticker.tick().await;
        loop {
            tokio::select! {
                res = &mut signal => {
                    res.context("installing signal handlers")?;
                    break;
                }
                _ = ticker.tick() => info!("status\n{manager}"),
            }
        }
    }

    manager.stop().await;
    info!("mediator stopped\n{manager}");
    Ok(())
}
