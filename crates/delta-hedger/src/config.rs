use serde::{Deserialize, Serialize};

fn default_min_hedge_shares() -> i64 {
    5
}
fn default_hedge_cooldown_bars() -> u64 {
    5
}
fn default_max_hedge_trades_per_day() -> u32 {
    50
}
fn default_max_notional_per_day() -> f64 {
    100_000.0
}
fn default_max_orphan_bars() -> u64 {
    60
}

/// Mirrors spec.md §4.8's diff-suppression thresholds and orphan-protection window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgerConfig {
    #[serde(default = "default_min_hedge_shares")]
    pub min_hedge_shares: i64,
    #[serde(default = "default_hedge_cooldown_bars")]
    pub hedge_cooldown_bars: u64,
    #[serde(default = "default_max_hedge_trades_per_day")]
    pub max_hedge_trades_per_day: u32,
    #[serde(default = "default_max_notional_per_day")]
    pub max_notional_per_day: f64,
    #[serde(default = "default_max_orphan_bars")]
    pub max_orphan_bars: u64,
}

impl Default for HedgerConfig {
    fn default() -> Self {
        Self {
            min_hedge_shares: default_min_hedge_shares(),
            hedge_cooldown_bars: default_hedge_cooldown_bars(),
            max_hedge_trades_per_day: default_max_hedge_trades_per_day(),
            max_notional_per_day: default_max_notional_per_day(),
            max_orphan_bars: default_max_orphan_bars(),
        }
    }
}
