use chrono::{DateTime, Utc};
use engine_core::{Right, StrikePolicy};

/// A single contract quote, enough to build or mark a `Leg`.
#[derive(Debug, Clone, Copy)]
pub struct OptionQuote {
    pub strike: f64,
    pub expiry: DateTime<Utc>,
    pub right: Right,
    pub bid: f64,
    pub ask: f64,
    pub iv: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl OptionQuote {
    pub fn mark(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Seam between the package manager and whatever feeds it live chain data —
/// a vendor snapshot in production, a fixed table in tests.
pub trait OptionsChainSource {
    /// Expiries available for `symbol` with DTE inside `dte_window`, sorted ascending.
    fn expiries(&self, symbol: &str, as_of: DateTime<Utc>, dte_window: (i64, i64)) -> Vec<DateTime<Utc>>;

    /// Strikes available for `symbol`/`expiry`/`right`, any order.
    fn strikes(&self, symbol: &str, expiry: DateTime<Utc>, right: Right) -> Vec<f64>;

    fn quote(&self, symbol: &str, right: Right, strike: f64, expiry: DateTime<Utc>) -> Option<OptionQuote>;
}

/// Picks the expiry whose DTE is closest to the midpoint of `dte_window`.
pub fn select_expiry(expiries: &[DateTime<Utc>], as_of: DateTime<Utc>, dte_window: (i64, i64)) -> Option<DateTime<Utc>> {
    let target_dte = (dte_window.0 + dte_window.1) as f64 / 2.0;
    expiries
        .iter()
        .copied()
        .min_by(|a, b| {
            let dte_a = (*a - as_of).num_days() as f64;
            let dte_b = (*b - as_of).num_days() as f64;
            (dte_a - target_dte).abs().partial_cmp(&(dte_b - target_dte).abs()).unwrap()
        })
}

/// Picks a strike per `policy`: nearest to spot for `AtTheMoney`, nearest to
/// the target absolute delta for `TargetDelta` (looked up via `source`).
pub fn select_strike(
    source: &dyn OptionsChainSource,
    symbol: &str,
    right: Right,
    expiry: DateTime<Utc>,
    spot: f64,
    policy: &StrikePolicy,
) -> Option<f64> {
    let strikes = source.strikes(symbol, expiry, right);
    match policy {
        StrikePolicy::AtTheMoney => strikes
            .into_iter()
            .min_by(|a, b| (a - spot).abs().partial_cmp(&(b - spot).abs()).unwrap()),
        StrikePolicy::TargetDelta(target) => strikes
            .into_iter()
            .filter_map(|k| source.quote(symbol, right, k, expiry).map(|q| (k, q.delta.abs())))
            .min_by(|(_, da), (_, db)| (da - target.abs()).abs().partial_cmp(&(db - target.abs()).abs()).unwrap())
            .map(|(k, _)| k),
    }
}
