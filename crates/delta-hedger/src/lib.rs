//! Per-bar delta hedging for long-gamma option packages (spec.md §4.8):
//! hedge to neutral with diff suppression, weighted-average share pricing,
//! and orphan protection once the owning package closes.

mod config;

pub use config::HedgerConfig;

use std::collections::HashMap;

use broker::BrokerClient;
use engine_core::{EngineError, EngineResult, HedgeState, Order, OrderResult, OrderSide, Package, PackageState, Strategy};

/// Owns every package's `HedgeState` plus the orphan-tracking clock that sits
/// alongside it (not part of the shared data model since it's purely this
/// crate's bookkeeping).
pub struct DeltaHedger {
    states: HashMap<String, HedgeState>,
    orphan_since_bar: HashMap<String, u64>,
    config: HedgerConfig,
}

impl DeltaHedger {
    pub fn new(config: HedgerConfig) -> Self {
        Self {
            states: HashMap::new(),
            orphan_since_bar: HashMap::new(),
            config,
        }
    }

    pub fn state(&self, package_id: &str) -> Option<&HedgeState> {
        self.states.get(package_id)
    }

    /// Zeroes `hedge_trades_today`/`notional_today` for every tracked package. Call once at the start of each trading day.
    pub fn reset_daily_counters(&mut self) {
        for state in self.states.values_mut() {
            state.hedge_trades_today = 0;
            state.notional_today = 0.0;
        }
    }

    /// Runs one bar of the hedging contract for `package`. Only applies to
    /// LONG-gamma (GAMMA_SCALPER) packages; other strategies are a no-op.
    /// `flatten` bypasses every diff-suppression threshold — used on package
    /// exit and orphan recovery, where the hedge must close out regardless.
    pub async fn hedge(
        &mut self,
        package: &Package,
        bar_index: u64,
        mark_price: f64,
        broker: &dyn BrokerClient,
        flatten: bool,
    ) -> EngineResult<Option<OrderResult>> {
        if package.strategy != Strategy::GammaScalper {
            return Ok(None);
        }

        let state = self
            .states
            .entry(package.package_id.clone())
            .or_insert_with(|| HedgeState::new(package.package_id.clone()));

        let target_shares = if flatten { 0 } else { -(100.0 * package.net_delta()).round() as i64 };
        let diff = target_shares - state.current_shares;

        if diff == 0 {
            return Ok(None);
        }

        if !flatten {
            let cooled_down = state
                .last_hedge_bar
                .map(|last| bar_index.saturating_sub(last) >= self.config.hedge_cooldown_bars)
                .unwrap_or(true);

            if diff.unsigned_abs() < self.config.min_hedge_shares.unsigned_abs()
                || !cooled_down
                || state.hedge_trades_today >= self.config.max_hedge_trades_per_day
                || state.notional_today >= self.config.max_notional_per_day
            {
                return Ok(None);
            }
        }

        let side = if diff > 0 { OrderSide::Buy } else { OrderSide::Sell };
        let order = Order {
            client_order_id: format!("{}-hedge-{bar_index}", package.package_id),
            symbol: package.symbol.clone(),
            contract_symbol: None,
            side,
            quantity: diff.unsigned_abs() as u64,
            reason: if flatten { "hedge_flatten".into() } else { "delta_hedge".into() },
        };

        let result = broker
            .submit(&order, mark_price)
            .await
            .map_err(|e| EngineError::BrokerTimeout(e.to_string()))?;

        apply_hedge_fill(state, diff, result.fill_price);
        state.last_hedge_bar = Some(bar_index);
        state.hedge_trades_today += 1;
        state.notional_today += result.fill_price * diff.unsigned_abs() as f64;

        Ok(Some(result))
    }

    /// `true` once a CLOSED package's hedge shares have sat nonzero for at
    /// least `max_orphan_bars`; the caller should immediately flatten via
    /// `hedge(..., flatten = true)` and this raises the alert.
    pub fn check_orphan(&mut self, package: &Package, bar_index: u64) -> bool {
        let has_orphaned_shares = matches!(
            self.states.get(&package.package_id),
            Some(state) if package.state == PackageState::Closed && state.current_shares != 0
        );
        if !has_orphaned_shares {
            self.orphan_since_bar.remove(&package.package_id);
            return false;
        }

        let since = *self
            .orphan_since_bar
            .entry(package.package_id.clone())
            .or_insert(bar_index);
        if bar_index.saturating_sub(since) >= self.config.max_orphan_bars {
            tracing::error!(package_id = %package.package_id, "hedge shares orphaned past max_orphan_bars, flattening");
            true
        } else {
            false
        }
    }
}

/// Weighted-average share price update, same convention the paper broker
/// uses for stock fills: blend on same-direction adds, realize P&L on the
/// closed portion when reducing or flipping.
fn apply_hedge_fill(state: &mut HedgeState, diff: i64, fill_price: f64) {
    let prev_shares = state.current_shares;
    let new_shares = prev_shares + diff;

    if prev_shares == 0 || prev_shares.signum() == diff.signum() {
        let prev_notional = state.avg_share_price * prev_shares.unsigned_abs() as f64;
        let add_notional = fill_price * diff.unsigned_abs() as f64;
        let total_abs = new_shares.unsigned_abs() as f64;
        if total_abs > 0.0 {
            state.avg_share_price = (prev_notional + add_notional) / total_abs;
        }
    } else {
        let closed_qty = prev_shares.unsigned_abs().min(diff.unsigned_abs()) as f64;
        state.realized_hedge_pnl += (fill_price - state.avg_share_price) * closed_qty * prev_shares.signum() as f64;
    }
    state.current_shares = new_shares;
}
