use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use rangecraft::broker::{BrokerClient, LatestBarFeed};
use rangecraft::gateway::{ReplayClock, ReplayFeed, SimulatedGateway, SystemClock};
use rangecraft::{StrategyConfig, StrategyEngine, StrategyRunner};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::time::Duration;

#[derive(Parser)]
#[command(name = "rangecraft")]
#[command(about = "A range-bound mean-reversion trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade live against the configured broker
    Run {
        /// Instrument to trade
        symbol: String,
        /// Path to the JSON strategy parameter file
        #[arg(long = "config", value_name = "PATH")]
        config: Option<PathBuf>,
        /// Seconds between decision cycles
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Replay a recorded bar file against the simulated gateway
    Paper {
        /// Instrument label for logs and trade records
        symbol: String,
        /// JSON array of bars to replay
        #[arg(long = "bars", value_name = "PATH")]
        bars: PathBuf,
        /// Path to the JSON strategy parameter file
        #[arg(long = "config", value_name = "PATH")]
        config: Option<PathBuf>,
        /// Starting account equity for the simulation
        #[arg(long, default_value_t = 100_000.0)]
        equity: f64,
    },
    /// Validate a strategy parameter file and print the resolved values
    CheckConfig {
        /// Path to the JSON strategy parameter file
        #[arg(value_name = "PATH")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("Starting rangecraft. Not financial advice. Use at your own risk.");

    match cli.command {
        Commands::Run {
            symbol,
            config,
            interval,
        } => {
            let config = load_config(config.as_deref())?;
            let engine = StrategyEngine::new(&symbol, config);
            let gateway = BrokerClient::from_env(&symbol)?;
            let feed = LatestBarFeed::from_env(&symbol, Duration::from_secs(5))?;
            let shutdown = shutdown_signal();

            let runner = StrategyRunner::new(
                engine,
                feed,
                gateway,
                SystemClock,
                Duration::from_secs(interval),
                shutdown,
            );
            let engine = runner.run().await?;
            report(&engine);
        }
        Commands::Paper {
            symbol,
            bars,
            config,
            equity,
        } => {
            let config = load_config(config.as_deref())?;
            let engine = StrategyEngine::new(&symbol, config);
            let feed = ReplayFeed::from_file(&bars)?;
            let start = feed.first_timestamp().unwrap_or_else(chrono::Utc::now);
            let clock = ReplayClock::new(start);
            let feed = feed.with_clock(clock.clone());
            let gateway = SimulatedGateway::new(equity);
            let shutdown = shutdown_signal();

            let runner = StrategyRunner::new(
                engine,
                feed,
                gateway,
                clock,
                Duration::ZERO,
                shutdown,
            );
            let engine = runner.run().await?;
            report(&engine);
        }
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{:#?}", config);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<StrategyConfig> {
    let parameters: HashMap<String, Value> = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("cannot parse config file {}", path.display()))?
        }
        None => HashMap::new(),
    };
    Ok(StrategyConfig::from_parameters(&parameters)?)
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down after the current cycle");
            let _ = tx.send(true);
        }
    });
    rx
}

fn report(engine: &StrategyEngine) {
    let state = engine.risk_state();
    info!(
        "{}: {} trades today, daily pnl {:.2}",
        engine.symbol(),
        state.trades_today,
        state.daily_pnl
    );
    for trade in engine.trade_log() {
        info!(
            "{} {}: entry {:.2} exit {:.2} qty {} pnl {:.2} ({})",
            trade.symbol,
            trade.exit_reason.as_str(),
            trade.entry_price,
            trade.exit_price,
            trade.quantity,
            trade.realized_pnl,
            trade.duration_secs
        );
    }
}
