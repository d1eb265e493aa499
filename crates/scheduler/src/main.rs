//! Entry point: loads `.env` and the TOML config, wires up the concrete
//! `BarSource`/`BrokerClient` per `feed`/`broker` config, and drives the bar
//! loop until `EndOfStream` or a signal (mirrors the teacher's
//! `trading-agent/src/main.rs` startup sequence: dotenv, tracing init, panic
//! hook, component construction, signal-driven shutdown).

mod chain;
mod config;
mod engine;
mod microstructure;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use bar_source::{BarSource, PolygonBarSource, ReplayBarSource};
use broker::{BrokerClient, PaperBroker};
use chain::NullChain;
use clap_free_args::config_path_from_args;
use config::{EngineConfig, FeedMode};
use engine::Engine;
use microstructure::NullMicrostructureProvider;
use state_store::EngineSnapshotStore;
use tokio::signal::unix::SignalKind;

mod clap_free_args {
    use std::path::PathBuf;

    /// No CLI-parsing crate in the teacher's dependency set for this binary
    /// shape — a single positional path argument, defaulted, is simplest.
    pub fn config_path_from_args() -> PathBuf {
        std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("engine.toml"))
    }
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("starting regime-aware trading engine");

    let config_path: PathBuf = config_path_from_args();
    let config = EngineConfig::load(&config_path).with_context(|| format!("loading config from {}", config_path.display()))?;
    tracing::info!(symbols = ?config.symbols, feed = ?config.feed, seed = config.seed, "configuration loaded");

    let bar_source: Box<dyn BarSource> = match config.feed {
        FeedMode::Live | FeedMode::Cached => Box::new(PolygonBarSource::new(config.polygon_api_key.clone(), 5)),
        FeedMode::Replay => {
            let start = config.replay.start_time.context("replay.start_time is required in replay mode")?;
            let end = config.replay.end_time.context("replay.end_time is required in replay mode")?;
            Box::new(ReplayBarSource::new(Default::default(), (start, end), config.strict_data_mode))
        }
    };

    let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(config.seed, config.starting_equity, config.slippage_bps));

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let store = match EngineSnapshotStore::connect(&database_url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "snapshot store unavailable, running without crash recovery");
            None
        }
    };

    let mut engine = Engine::new(
        config,
        bar_source,
        broker,
        Arc::new(NullChain),
        Box::new(NullMicrostructureProvider),
        store,
    );

    let stop_flag = engine.stop_handle();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
        stop_flag.store(true, Ordering::SeqCst);
    });

    engine.run().await.context("bar loop exited with an error")?;

    tracing::info!(state = ?engine.state(), bars = engine.bar_index(), "engine stopped");
    Ok(())
}
