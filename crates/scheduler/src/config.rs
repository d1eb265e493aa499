//! `EngineConfig`: every key from spec.md §6, loaded from a TOML file with
//! environment-variable overrides for broker secrets (the
//! `AgentConfig::from_env` pattern in the teacher, adapted so the bulk of
//! the config lives in a file and only secrets come from the environment).

use std::collections::HashMap;
use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use engine_core::Regime;
use serde::{Deserialize, Serialize};

use delta_hedger::HedgerConfig;
use options_package_manager::ManagerConfig;
use risk_gate::RiskConfig;

fn default_min_bars_for_features() -> usize {
    30
}
fn default_seed() -> u64 {
    42
}
fn default_strict_data_mode() -> bool {
    true
}
fn default_feed() -> FeedMode {
    FeedMode::Replay
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Live,
    Cached,
    Replay,
}

/// Which `BrokerClient` implementation the scheduler wires up. Live brokers
/// (Alpaca/IBKR) are out of scope (spec.md §1 non-goals) — `Live` is
/// recognized for config compatibility but `build_engine` only constructs
/// `PaperBroker` today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplayConfig {
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_replay_speed")]
    pub replay_speed: f64,
}

fn default_replay_speed() -> f64 {
    60.0
}

impl Default for FeedMode {
    fn default() -> Self {
        FeedMode::Replay
    }
}

/// Mirrors spec.md §6's recognized configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub broker: BrokerKind,
    #[serde(default = "default_feed")]
    pub feed: FeedMode,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default = "default_strict_data_mode")]
    pub strict_data_mode: bool,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub delta_hedge: HedgerConfig,
    #[serde(default)]
    pub options: ManagerConfig,
    #[serde(default)]
    pub strategy_params: StrategyParams,
    #[serde(default = "default_min_bars_for_features")]
    pub min_bars_for_features: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_starting_equity")]
    pub starting_equity: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,

    /// Symbols with a usable options chain. `None` (the default, unset in
    /// the TOML) means every symbol in `symbols` is optionable.
    #[serde(default)]
    pub optionable_symbols: Option<Vec<String>>,

    /// Populated from `POLYGON_API_KEY` / broker secrets, never stored in the file.
    #[serde(skip)]
    pub polygon_api_key: String,
}

fn default_starting_equity() -> f64 {
    100_000.0
}
fn default_slippage_bps() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThetaParams {
    pub tp_pct: Option<f64>,
    pub sl_pct: Option<f64>,
    pub iv_collapse_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GammaParams {
    pub tp_pct: Option<f64>,
    pub sl_pct: Option<f64>,
    pub max_hold_bars: Option<u32>,
    pub gex_reversal_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrategyParams {
    #[serde(default)]
    pub theta: ThetaParams,
    #[serde(default)]
    pub gamma: GammaParams,
}

impl EngineConfig {
    /// Loads the TOML file at `path`, then layers environment overrides for
    /// secrets (broker API keys) on top — following the
    /// `env::var(...).unwrap_or_else(...)` pattern the teacher uses in
    /// `AgentConfig::from_env`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let mut config: EngineConfig = toml::from_str(&text).context("parsing config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var("POLYGON_API_KEY") {
            self.polygon_api_key = key;
        }
    }

    pub fn regime_caps(&self) -> &HashMap<Regime, f64> {
        &self.risk.regime_caps
    }
}
