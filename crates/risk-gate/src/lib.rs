//! Ordered sizing gate between the meta-policy and the broker (spec.md
//! §4.6). Every step runs in sequence; the first one that rejects wins, and
//! every rejection carries a machine-readable [`BlockReason`].

mod config;

pub use config::RiskConfig;

use engine_core::{BlockReason, FinalIntent, KillSwitch, Order, OrderSide, RegimeSignal, RiskDecision, RiskState};
use statrs::distribution::{ContinuousCDF, Normal};

/// Account- and position-level context the gate needs beyond `RiskState`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Account {
    pub equity: f64,
    /// Signed existing stock position for the intent's symbol.
    pub existing_position_qty: i64,
    /// Current dollar exposure already committed to this symbol.
    pub existing_symbol_exposure: f64,
    /// Current dollar exposure already committed to this regime, across symbols.
    pub existing_regime_exposure: f64,
    /// Net shares currently held from stock positions plus option hedges.
    pub current_hedge_shares: i64,
}

fn z_95() -> f64 {
    Normal::new(0.0, 1.0)
        .expect("standard normal parameters are always valid")
        .inverse_cdf(0.95)
}

fn estimate_var_1d(position_dollars: f64, daily_vol: f64) -> f64 {
    position_dollars.abs() * daily_vol.max(0.0) * z_95()
}

fn daily_vol_from_signal(signal: &RegimeSignal) -> f64 {
    signal
        .features
        .get("realized_vol")
        .map(|annualized| annualized / 252.0_f64.sqrt())
        .unwrap_or(0.02)
}

/// `true` when `intent` reduces (or flattens) the existing position rather
/// than growing it — exits bypass the daily-loss entry block.
fn is_exit(intent: &FinalIntent, existing_position_qty: i64) -> bool {
    if existing_position_qty == 0 {
        return false;
    }
    let existing_sign = existing_position_qty.signum() as f64;
    let intent_sign = intent.position_delta.signum();
    existing_sign != 0.0 && intent_sign != 0.0 && existing_sign != intent_sign
}

pub fn size(
    intent: &FinalIntent,
    account: &Account,
    risk_state: &RiskState,
    signal: &RegimeSignal,
    bar_close: f64,
    config: &RiskConfig,
) -> RiskDecision {
    if intent.is_hold() {
        return RiskDecision::Block { reason: BlockReason::ZeroSize, detail: "hold intent".into() };
    }

    // 1. Kill switch.
    if risk_state.kill_switch == KillSwitch::Hard {
        return RiskDecision::Block {
            reason: BlockReason::KillSwitchHard,
            detail: "kill switch is HARD".into(),
        };
    }

    // 2. Daily loss limit blocks entries only; exits always proceed.
    let exit = is_exit(intent, account.existing_position_qty);
    if !exit && risk_state.daily_pnl <= -config.daily_loss_pct * risk_state.day_start_equity {
        return RiskDecision::Block {
            reason: BlockReason::DailyLossLimit,
            detail: format!(
                "daily_pnl {:.2} breached -{:.1}% of day-start equity",
                risk_state.daily_pnl,
                config.daily_loss_pct * 100.0
            ),
        };
    }

    // 3. Regime dollar cap.
    let regime_cap_dollars = account.equity * config.regime_cap_pct(signal.regime);
    let remaining_regime_budget = (regime_cap_dollars - account.existing_regime_exposure).max(0.0);
    if remaining_regime_budget <= 0.0 && !exit {
        return RiskDecision::Block {
            reason: BlockReason::RegimeCapExceeded,
            detail: format!("{:?} regime exposure at cap", signal.regime),
        };
    }
    let mut dollars = remaining_regime_budget * intent.position_delta.abs().min(1.0);

    // 4. Volatility scaling.
    dollars *= config.vol_weight(signal.volatility);

    // 5. Confidence scaling.
    dollars *= intent.confidence.clamp(0.0, 1.0);

    // 6. VaR-like cap.
    let daily_vol = daily_vol_from_signal(signal);
    let estimated_var = estimate_var_1d(dollars, daily_vol);
    if estimated_var > account.equity * config.var_pct {
        return RiskDecision::Block {
            reason: BlockReason::VarCapExceeded,
            detail: format!(
                "estimated 1d VaR {:.2} exceeds {:.2} ({:.1}% of equity)",
                estimated_var,
                account.equity * config.var_pct,
                config.var_pct * 100.0
            ),
        };
    }

    // 7. Per-symbol dollar cap.
    let symbol_cap_dollars = account.equity * config.symbol_cap_pct;
    let remaining_symbol_budget = (symbol_cap_dollars - account.existing_symbol_exposure).max(0.0);
    dollars = dollars.min(remaining_symbol_budget);
    if dollars <= 0.0 {
        return RiskDecision::Block {
            reason: BlockReason::SymbolCapExceeded,
            detail: format!("{} symbol exposure at cap", intent.symbol),
        };
    }

    // 8. Dollars to quantity, lot-rounded.
    if bar_close <= 0.0 {
        return RiskDecision::Block { reason: BlockReason::ZeroSize, detail: "non-positive price".into() };
    }
    let lot = config.lot_size.max(1);
    let raw_qty = (dollars / bar_close) as u64;
    let qty = (raw_qty / lot) * lot;
    if qty == 0 {
        return RiskDecision::Block {
            reason: BlockReason::ZeroSize,
            detail: "sized quantity rounds to zero".into(),
        };
    }

    // Single-symbol delta cap: the resulting order must not push net shares
    // beyond the configured threshold.
    let side = OrderSide::from_signed_qty(if intent.position_delta >= 0.0 { qty as i64 } else { -(qty as i64) });
    let signed_qty = match side {
        OrderSide::Buy => qty as i64,
        OrderSide::Sell => -(qty as i64),
    };
    let resulting_shares = account.current_hedge_shares + signed_qty;
    if !exit && resulting_shares.abs() > config.delta_cap_shares {
        return RiskDecision::Block {
            reason: BlockReason::DeltaCapExceeded,
            detail: format!(
                "resulting net shares {resulting_shares} exceed cap {}",
                config.delta_cap_shares
            ),
        };
    }

    RiskDecision::Order(Order {
        client_order_id: uuid::Uuid::new_v4().to_string(),
        symbol: intent.symbol.clone(),
        contract_symbol: None,
        side,
        quantity: qty,
        reason: intent.reason.clone(),
    })
}
