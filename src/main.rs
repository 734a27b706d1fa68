use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paperhive::config::Config;
use paperhive::feed::{market_snapshot, SimulatedFeed};
use paperhive::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "paperhive", about = "Agent-orchestrated demo trading for prediction markets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator against a simulated feed.
    Run {
        /// Path to a TOML config file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stop after this many seconds instead of waiting for ctrl-c.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config from {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

/// Seed the simulated feed with a small demo universe: one arbitrage,
/// one near-resolution favorite, one thin market, and some noise.
fn demo_feed() -> Arc<SimulatedFeed> {
    let feed = Arc::new(SimulatedFeed::new(rand::random(), dec!(0.005)));
    feed.insert(market_snapshot(
        "demo-arb",
        "Will the incumbent win the runoff?",
        dec!(0.52),
        dec!(0.44),
        dec!(80000),
    ));
    let mut favorite = market_snapshot(
        "demo-decay",
        "Will the launch happen this week?",
        dec!(0.86),
        dec!(0.16),
        dec!(40000),
    );
    favorite.resolution_at = Some(Utc::now() + ChronoDuration::hours(12));
    feed.insert(favorite);
    feed.insert(market_snapshot(
        "demo-thin",
        "Will the bill pass committee?",
        dec!(0.78),
        dec!(0.25),
        dec!(600),
    ));
    feed.insert(market_snapshot(
        "demo-fair",
        "Will it snow on the summit today?",
        dec!(0.51),
        dec!(0.51),
        dec!(20000),
    ));
    feed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, duration_secs } => {
            let config = load_config(config.as_ref())?;
            init_tracing(&config);
            let orchestrator = Orchestrator::new(config, demo_feed());
            orchestrator.start();

            match duration_secs {
                Some(secs) => {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
            }
            orchestrator.shutdown().await;

            let status = orchestrator.status();
            info!(
                markets = status.markets,
                open_opportunities = status.open_opportunities,
                strategies = status.strategies,
                equity = %status.stats.equity,
                realized_pnl = %status.stats.realized_pnl,
                win_rate = status.stats.win_rate,
                "final status"
            );
            Ok(())
        }
        Command::CheckConfig { config } => {
            let loaded = load_config(Some(&config))?;
            init_tracing(&loaded);
            info!(path = %config.display(), "config is valid");
            Ok(())
        }
    }
}
