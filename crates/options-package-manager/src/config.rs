use serde::{Deserialize, Serialize};

fn default_entry_tolerance_pct() -> f64 {
    0.10
}
fn default_broken_timeout_bars() -> u32 {
    3
}
fn default_theta_take_profit_pct() -> f64 {
    0.50
}
fn default_theta_stop_loss_pct() -> f64 {
    2.00
}
fn default_theta_iv_collapse_pct() -> f64 {
    0.30
}
fn default_gamma_take_profit_pct() -> f64 {
    1.50
}
fn default_gamma_stop_loss_pct() -> f64 {
    0.50
}
fn default_gamma_max_hold_bars() -> u32 {
    390
}

/// Mirrors spec.md §4.7's entry-tolerance check and the per-strategy exit
/// table in spec.md §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_entry_tolerance_pct")]
    pub entry_tolerance_pct: f64,
    /// Bars a package may sit with a leg PENDING/PARTIAL before it's marked BROKEN.
    #[serde(default = "default_broken_timeout_bars")]
    pub broken_timeout_bars: u32,
    #[serde(default = "default_theta_take_profit_pct")]
    pub theta_take_profit_pct: f64,
    #[serde(default = "default_theta_stop_loss_pct")]
    pub theta_stop_loss_pct: f64,
    #[serde(default = "default_theta_iv_collapse_pct")]
    pub theta_iv_collapse_pct: f64,
    #[serde(default = "default_gamma_take_profit_pct")]
    pub gamma_take_profit_pct: f64,
    #[serde(default = "default_gamma_stop_loss_pct")]
    pub gamma_stop_loss_pct: f64,
    #[serde(default = "default_gamma_max_hold_bars")]
    pub gamma_max_hold_bars: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            entry_tolerance_pct: default_entry_tolerance_pct(),
            broken_timeout_bars: default_broken_timeout_bars(),
            theta_take_profit_pct: default_theta_take_profit_pct(),
            theta_stop_loss_pct: default_theta_stop_loss_pct(),
            theta_iv_collapse_pct: default_theta_iv_collapse_pct(),
            gamma_take_profit_pct: default_gamma_take_profit_pct(),
            gamma_stop_loss_pct: default_gamma_stop_loss_pct(),
            gamma_max_hold_bars: default_gamma_max_hold_bars(),
        }
    }
}
