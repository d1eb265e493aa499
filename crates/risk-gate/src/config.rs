use std::collections::HashMap;

use engine_core::{Regime, VolatilityBucket};
use serde::{Deserialize, Serialize};

fn default_daily_loss_pct() -> f64 {
    0.03
}
fn default_max_drawdown_pct() -> f64 {
    0.15
}
fn default_max_loss_streak() -> u32 {
    5
}
fn default_var_pct() -> f64 {
    0.02
}
fn default_symbol_cap_pct() -> f64 {
    0.10
}
fn default_lot_size() -> u64 {
    1
}
fn default_delta_cap_shares() -> i64 {
    5_000
}
fn default_regime_caps() -> HashMap<Regime, f64> {
    let mut m = HashMap::new();
    m.insert(Regime::Trend, 0.15);
    m.insert(Regime::MeanReversion, 0.10);
    m.insert(Regime::Compression, 0.05);
    m.insert(Regime::Expansion, 0.10);
    m
}
fn default_vol_scaling() -> HashMap<VolatilityBucket, f64> {
    let mut m = HashMap::new();
    m.insert(VolatilityBucket::Low, 1.0);
    m.insert(VolatilityBucket::Medium, 0.85);
    m.insert(VolatilityBucket::High, 0.5);
    m
}

/// Mirrors spec.md §6's `risk: {...}` configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_daily_loss_pct")]
    pub daily_loss_pct: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_loss_streak")]
    pub max_loss_streak: u32,
    #[serde(default = "default_regime_caps")]
    pub regime_caps: HashMap<Regime, f64>,
    #[serde(default = "default_var_pct")]
    pub var_pct: f64,
    #[serde(default = "default_symbol_cap_pct")]
    pub symbol_cap_pct: f64,
    #[serde(default = "default_vol_scaling")]
    pub vol_scaling: HashMap<VolatilityBucket, f64>,
    #[serde(default = "default_lot_size")]
    pub lot_size: u64,
    #[serde(default = "default_delta_cap_shares")]
    pub delta_cap_shares: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_pct: default_daily_loss_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_loss_streak: default_max_loss_streak(),
            regime_caps: default_regime_caps(),
            var_pct: default_var_pct(),
            symbol_cap_pct: default_symbol_cap_pct(),
            vol_scaling: default_vol_scaling(),
            lot_size: default_lot_size(),
            delta_cap_shares: default_delta_cap_shares(),
        }
    }
}

impl RiskConfig {
    pub fn regime_cap_pct(&self, regime: Regime) -> f64 {
        self.regime_caps.get(&regime).copied().unwrap_or(0.05)
    }

    pub fn vol_weight(&self, volatility: VolatilityBucket) -> f64 {
        self.vol_scaling.get(&volatility).copied().unwrap_or(1.0)
    }
}
