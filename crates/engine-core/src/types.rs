use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

/// OHLCV bar for a single symbol. `symbol` is carried on the bar itself so
/// every consumer can assert `bar.symbol == subscribed` before using it for
/// pricing (spec invariant: bars must never be mixed across symbols).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Returns `true` when this bar is safe to use for pricing `symbol`.
    pub fn matches(&self, symbol: &str) -> bool {
        self.symbol == symbol
    }
}

// ---------------------------------------------------------------------------
// Regime signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Trend,
    MeanReversion,
    Compression,
    Expansion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GexRegime {
    Positive,
    Negative,
    Unknown,
}

/// Produced once per (symbol, bar) by the regime classifier. Microstructure
/// fields (`gex_regime`, `gex_strength`, `iv_percentile`) are attached by the
/// scheduler, not computed by the classifier itself (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub regime: Regime,
    pub direction: Direction,
    pub volatility: VolatilityBucket,
    pub bias: Bias,
    /// In [0, 1].
    pub confidence: f64,
    pub gex_regime: GexRegime,
    /// Dollar magnitude of dealer gamma exposure; 0.0 when `gex_regime == Unknown`.
    pub gex_strength: f64,
    /// Rank of current IV within a trailing 252-day window, in [0, 1], or `None`.
    pub iv_percentile: Option<f64>,
    /// Opaque feature snapshot handed to agents; additive/versioned by convention.
    pub features: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Stock,
    OptionSingle,
    OptionPackage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageKind {
    Straddle,
    Strangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for LONG, -1 for SHORT — used by the net-delta sign convention.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Right {
    Call,
    Put,
}

/// Carried by intents/packages targeting a multi-leg options structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionMeta {
    pub package_kind: PackageKind,
    pub side: Side,
    /// Either explicit target strikes or target deltas, per the pluggable
    /// strike-selection policy (spec.md §9 open question — see DESIGN.md).
    pub strike_policy: StrikePolicy,
    /// Inclusive days-to-expiry window to select a contract from, e.g. (25, 45).
    pub dte_window: (i64, i64),
    pub contracts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrikePolicy {
    /// Select the strike(s) closest to at-the-money.
    AtTheMoney,
    /// Select the strike(s) closest to the given absolute delta (e.g. 0.25).
    TargetDelta(f64),
}

/// An agent's proposal. Pure output of `Agent::evaluate` — no side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: String,
    pub agent_id: String,
    pub direction: Direction,
    /// Desired magnitude in [0, 1] before sizing by the risk gate.
    pub magnitude: f64,
    pub confidence: f64,
    pub reason: String,
    pub instrument_kind: InstrumentKind,
    pub option_meta: Option<OptionMeta>,
}

/// The single intent the meta-policy arbitrates down to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalIntent {
    pub symbol: String,
    /// Signed desired change in position; 0 means "hold".
    pub position_delta: f64,
    pub confidence: f64,
    pub primary_agent: String,
    pub contributors: Vec<String>,
    pub reason: String,
    pub instrument_kind: InstrumentKind,
    pub option_meta: Option<OptionMeta>,
}

impl FinalIntent {
    pub fn hold(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            position_delta: 0.0,
            confidence: 0.0,
            primary_agent: "meta_policy".to_string(),
            contributors: Vec::new(),
            reason: reason.into(),
            instrument_kind: InstrumentKind::Stock,
            option_meta: None,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.position_delta == 0.0
    }
}

// ---------------------------------------------------------------------------
// Stock position
// ---------------------------------------------------------------------------

/// Invariant: `quantity > 0` ⇒ long, `quantity < 0` ⇒ short, `quantity == 0` ⇒ absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0,
            avg_entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

// ---------------------------------------------------------------------------
// Options legs and packages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillStatus {
    Pending,
    Partial,
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub leg_id: String,
    pub contract_symbol: String,
    pub right: Right,
    pub strike: f64,
    pub expiry: DateTime<Utc>,
    pub side: Side,
    pub quantity: u32,
    pub avg_entry_price: f64,
    pub last_mark: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub iv: f64,
    pub fill_status: FillStatus,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

impl Leg {
    /// Signed per-share delta contribution: SHORT legs contribute negatively.
    pub fn signed_delta(&self) -> f64 {
        self.side.sign() * self.quantity as f64 * self.delta
    }

    /// P&L sign convention: LONG gains when `last_mark` rises, SHORT gains when it falls.
    pub fn mark_unrealized(&mut self, mark: f64) {
        self.last_mark = mark;
        self.unrealized_pnl =
            self.side.sign() * (mark - self.avg_entry_price) * self.quantity as f64 * 100.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    ThetaHarvester,
    GammaScalper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageState {
    Open,
    Closing,
    Closed,
    Broken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub package_id: String,
    pub symbol: String,
    pub strategy: Strategy,
    pub kind: PackageKind,
    pub side: Side,
    pub legs: Vec<Leg>,
    pub entry_time: DateTime<Utc>,
    pub entry_credit_or_debit: f64,
    pub expected_credit_or_debit: f64,
    pub entry_iv: f64,
    pub entry_gex: f64,
    pub state: PackageState,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub bars_held: u32,
    /// Set when a closed package still shows hedge shares outstanding.
    pub orphaned: bool,
}

/// Deterministic package id: `f(symbol, kind, side, call_strike, put_strike, expiry)`.
pub fn package_id(
    symbol: &str,
    kind: PackageKind,
    side: Side,
    call_strike: f64,
    put_strike: f64,
    expiry: DateTime<Utc>,
) -> String {
    format!(
        "{symbol}-{kind:?}-{side:?}-{call_strike:.2}-{put_strike:.2}-{}",
        expiry.format("%Y%m%d")
    )
}

impl Package {
    /// Σ leg.unrealized_pnl — must equal `package.unrealized_pnl` within ±$0.01.
    pub fn legs_unrealized_pnl(&self) -> f64 {
        self.legs.iter().map(|l| l.unrealized_pnl).sum()
    }

    pub fn legs_realized_pnl(&self) -> f64 {
        self.legs.iter().map(|l| l.realized_pnl).sum()
    }

    /// `Σ sign(leg.side) * leg.quantity * leg.delta`, per-share (not × 100).
    pub fn net_delta(&self) -> f64 {
        self.legs.iter().map(Leg::signed_delta).sum()
    }

    pub fn any_leg_pending(&self) -> bool {
        self.legs
            .iter()
            .any(|l| matches!(l.fill_status, FillStatus::Pending | FillStatus::Partial))
    }

    pub fn all_legs_filled(&self) -> bool {
        self.legs
            .iter()
            .all(|l| l.fill_status == FillStatus::Filled)
    }
}

// ---------------------------------------------------------------------------
// Delta hedge state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeState {
    pub package_id: String,
    pub current_shares: i64,
    pub avg_share_price: f64,
    pub realized_hedge_pnl: f64,
    pub unrealized_hedge_pnl: f64,
    pub last_hedge_bar: Option<u64>,
    pub hedge_trades_today: u32,
    pub notional_today: f64,
}

impl HedgeState {
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            current_shares: 0,
            avg_share_price: 0.0,
            realized_hedge_pnl: 0.0,
            unrealized_hedge_pnl: 0.0,
            last_hedge_bar: None,
            hedge_trades_today: 0,
            notional_today: 0.0,
        }
    }

    /// `100 * net_delta(package) + current_shares`, i.e. total position delta
    /// including the hedge.
    pub fn total_delta(&self, package: &Package) -> f64 {
        100.0 * package.net_delta() + self.current_shares as f64
    }
}

// ---------------------------------------------------------------------------
// Risk state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KillSwitch {
    Off,
    Soft,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub starting_equity: f64,
    pub current_equity: f64,
    pub day_start_equity: f64,
    pub daily_pnl: f64,
    pub max_equity_hwm: f64,
    pub consecutive_losses: u32,
    pub kill_switch: KillSwitch,
    pub blocks_by_strategy: HashMap<String, u32>,
}

impl RiskState {
    pub fn new(starting_equity: f64) -> Self {
        Self {
            starting_equity,
            current_equity: starting_equity,
            day_start_equity: starting_equity,
            daily_pnl: 0.0,
            max_equity_hwm: starting_equity,
            consecutive_losses: 0,
            kill_switch: KillSwitch::Off,
            blocks_by_strategy: HashMap::new(),
        }
    }

    pub fn drawdown_from_peak_pct(&self) -> f64 {
        if self.max_equity_hwm <= 0.0 {
            return 0.0;
        }
        ((self.max_equity_hwm - self.current_equity) / self.max_equity_hwm) * 100.0
    }

    pub fn update_equity(&mut self, new_equity: f64) {
        self.current_equity = new_equity;
        self.daily_pnl = new_equity - self.day_start_equity;
        if new_equity > self.max_equity_hwm {
            self.max_equity_hwm = new_equity;
        }
    }

    pub fn record_block(&mut self, strategy: &str) {
        *self.blocks_by_strategy.entry(strategy.to_string()).or_insert(0) += 1;
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_signed_qty(qty: i64) -> Self {
        if qty >= 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// An order the risk gate, options package manager, or delta hedger submits
/// to the broker. `contract_symbol` is `None` for stock orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: String,
    pub contract_symbol: Option<String>,
    pub side: OrderSide,
    pub quantity: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
    Accepted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub fill_qty: u64,
    pub fill_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Machine-readable reason a risk block carries (spec.md §7: "all blocks
/// carry a machine-readable reason").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockReason {
    KillSwitchHard,
    DailyLossLimit,
    RegimeCapExceeded,
    VarCapExceeded,
    SymbolCapExceeded,
    DeltaCapExceeded,
    ZeroSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskDecision {
    Order(Order),
    Block { reason: BlockReason, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn package_id_is_deterministic() {
        let expiry = Utc.with_ymd_and_hms(2026, 9, 19, 0, 0, 0).unwrap();
        let a = package_id("SPY", PackageKind::Straddle, Side::Short, 450.0, 450.0, expiry);
        let b = package_id("SPY", PackageKind::Straddle, Side::Short, 450.0, 450.0, expiry);
        assert_eq!(a, b);
    }

    #[test]
    fn leg_signed_delta_flips_sign_for_short() {
        let mut leg = sample_leg(Side::Short, 0.5);
        assert_eq!(leg.signed_delta(), -0.5);
        leg.side = Side::Long;
        assert_eq!(leg.signed_delta(), 0.5);
    }

    fn sample_leg(side: Side, delta: f64) -> Leg {
        Leg {
            leg_id: "L1".into(),
            contract_symbol: "SPY250919C00450000".into(),
            right: Right::Call,
            strike: 450.0,
            expiry: Utc::now(),
            side,
            quantity: 1,
            avg_entry_price: 5.0,
            last_mark: 5.0,
            delta,
            gamma: 0.01,
            theta: -0.02,
            vega: 0.1,
            iv: 0.2,
            fill_status: FillStatus::Filled,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }
    }

    #[test]
    fn hedge_state_total_delta_matches_invariant() {
        let legs = vec![sample_leg(Side::Long, 0.5), sample_leg(Side::Long, 0.3)];
        let package = Package {
            package_id: "p1".into(),
            symbol: "SPY".into(),
            strategy: Strategy::GammaScalper,
            kind: PackageKind::Strangle,
            side: Side::Long,
            legs,
            entry_time: Utc::now(),
            entry_credit_or_debit: -100.0,
            expected_credit_or_debit: -100.0,
            entry_iv: 0.2,
            entry_gex: -1.0,
            state: PackageState::Open,
            exit_time: None,
            exit_reason: None,
            bars_held: 0,
            orphaned: false,
        };
        let mut hedge = HedgeState::new("p1");
        hedge.current_shares = -(100.0 * package.net_delta()).round() as i64;
        assert!(hedge.total_delta(&package).abs() < 1e-6);
    }
}
