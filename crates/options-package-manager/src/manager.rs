use std::collections::HashMap;

use broker::BrokerClient;
use chrono::{DateTime, Utc};
use engine_core::{
    package_id, EngineError, EngineResult, FillStatus, FinalIntent, GexRegime, Leg, Order, OrderSide, OrderStatus,
    Package, PackageKind, PackageState, RegimeSignal, Regime, Right, Side, Strategy,
};

use crate::config::ManagerConfig;
use crate::contracts::{select_expiry, select_strike, OptionsChainSource};

/// Why a package's exit rules fired (spec.md §4.7's per-strategy table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    IvCollapse,
    RegimeLeftCompression,
    GexFlippedPositive,
    MaxHoldReached,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::IvCollapse => "iv_collapse",
            ExitReason::RegimeLeftCompression => "regime_left_compression",
            ExitReason::GexFlippedPositive => "gex_flipped_positive",
            ExitReason::MaxHoldReached => "max_hold_reached",
        }
    }
}

/// Owns every open package's lifecycle: entry, per-bar marking, exit-rule
/// evaluation, and broken-leg detection. Closed packages move from
/// `packages` into the in-memory `ledger`.
pub struct OptionsPackageManager {
    packages: HashMap<String, Package>,
    pending_since_bar: HashMap<String, u32>,
    ledger: Vec<Package>,
    config: ManagerConfig,
}

impl OptionsPackageManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            packages: HashMap::new(),
            pending_since_bar: HashMap::new(),
            ledger: Vec::new(),
            config,
        }
    }

    pub fn open_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn ledger(&self) -> &[Package] {
        &self.ledger
    }

    pub fn get(&self, package_id: &str) -> Option<&Package> {
        self.packages.get(package_id)
    }

    /// Flags a CLOSED package's ledger entry ORPHAN once its hedge shares
    /// have sat nonzero past `DeltaHedger::check_orphan`'s threshold
    /// (spec.md §4.8/§4.9). Closed packages already live in `ledger`, not
    /// `packages`, so this searches there. Returns `false` if the id isn't
    /// found (already orphaned, or never closed).
    pub fn mark_orphaned(&mut self, package_id: &str) -> bool {
        match self.ledger.iter_mut().find(|p| p.package_id == package_id) {
            Some(package) => {
                package.orphaned = true;
                true
            }
            None => false,
        }
    }

    /// Selects contracts, submits one order per leg, and constructs the
    /// package with both legs PENDING/FILLED depending on the broker's
    /// response. Returns the new package id.
    pub async fn open(
        &mut self,
        intent: &FinalIntent,
        spot: f64,
        as_of: DateTime<Utc>,
        chain: &dyn OptionsChainSource,
        broker: &dyn BrokerClient,
    ) -> EngineResult<String> {
        let meta = intent
            .option_meta
            .as_ref()
            .ok_or_else(|| EngineError::InvariantViolation("option package intent missing option_meta".into()))?;

        let expiry = select_expiry(&chain.expiries(&intent.symbol, as_of, meta.dte_window), as_of, meta.dte_window)
            .ok_or_else(|| EngineError::FeedUnavailable(format!("no expiries in DTE window for {}", intent.symbol)))?;

        let call_strike = select_strike(chain, &intent.symbol, Right::Call, expiry, spot, &meta.strike_policy)
            .ok_or_else(|| EngineError::FeedUnavailable(format!("no call strikes for {}", intent.symbol)))?;
        let put_strike = match meta.package_kind {
            PackageKind::Straddle => call_strike,
            PackageKind::Strangle => select_strike(chain, &intent.symbol, Right::Put, expiry, spot, &meta.strike_policy)
                .ok_or_else(|| EngineError::FeedUnavailable(format!("no put strikes for {}", intent.symbol)))?,
        };

        let call_quote = chain
            .quote(&intent.symbol, Right::Call, call_strike, expiry)
            .ok_or_else(|| EngineError::FeedUnavailable("no call quote at selected strike".into()))?;
        let put_quote = chain
            .quote(&intent.symbol, Right::Put, put_strike, expiry)
            .ok_or_else(|| EngineError::FeedUnavailable("no put quote at selected strike".into()))?;

        let expected_credit_or_debit =
            meta.side.sign() * (call_quote.mark() + put_quote.mark()) * meta.contracts as f64 * 100.0;

        let id = package_id(&intent.symbol, meta.package_kind, meta.side, call_strike, put_strike, expiry);

        let mut legs = Vec::with_capacity(2);
        for (right, strike, quote) in [(Right::Call, call_strike, call_quote), (Right::Put, put_strike, put_quote)] {
            let contract_symbol = format!("{}-{}-{}-{:.2}", intent.symbol, expiry.format("%Y%m%d"), if right == Right::Call { "C" } else { "P" }, strike);
            let order = Order {
                client_order_id: format!("{id}-open-{}", if right == Right::Call { "C" } else { "P" }),
                symbol: intent.symbol.clone(),
                contract_symbol: Some(contract_symbol.clone()),
                side: match meta.side {
                    Side::Long => OrderSide::Buy,
                    Side::Short => OrderSide::Sell,
                },
                quantity: meta.contracts as u64,
                reason: intent.reason.clone(),
            };

            let result = broker
                .submit(&order, quote.mark())
                .await
                .map_err(|e| EngineError::BrokerTimeout(e.to_string()))?;

            legs.push(Leg {
                leg_id: order.client_order_id.clone(),
                contract_symbol,
                right,
                strike,
                expiry,
                side: meta.side,
                quantity: meta.contracts,
                avg_entry_price: result.fill_price,
                last_mark: result.fill_price,
                delta: quote.delta,
                gamma: quote.gamma,
                theta: quote.theta,
                vega: quote.vega,
                iv: quote.iv,
                fill_status: fill_status_of(result.status),
                unrealized_pnl: 0.0,
                realized_pnl: 0.0,
            });
        }

        let entry_iv = (legs[0].iv + legs[1].iv) / 2.0;
        let strategy = match meta.side {
            Side::Short => Strategy::ThetaHarvester,
            Side::Long => Strategy::GammaScalper,
        };

        let mut package = Package {
            package_id: id.clone(),
            symbol: intent.symbol.clone(),
            strategy,
            kind: meta.package_kind,
            side: meta.side,
            legs,
            entry_time: as_of,
            entry_credit_or_debit: 0.0,
            expected_credit_or_debit,
            entry_iv,
            entry_gex: 0.0,
            state: PackageState::Open,
            exit_time: None,
            exit_reason: None,
            bars_held: 0,
            orphaned: false,
        };

        if package.legs.iter().any(|l| l.fill_status == FillStatus::Rejected) {
            package.state = PackageState::Broken;
            tracing::error!(package_id = %id, "a leg was rejected on entry, marking package BROKEN");
        } else if package.all_legs_filled() {
            self.finalize_entry(&mut package)?;
        } else {
            self.pending_since_bar.insert(id.clone(), 0);
        }

        self.packages.insert(id.clone(), package);
        Ok(id)
    }

    fn finalize_entry(&self, package: &mut Package) -> EngineResult<()> {
        let actual: f64 = package
            .legs
            .iter()
            .map(|l| l.side.sign() * l.avg_entry_price * l.quantity as f64 * 100.0)
            .sum();
        package.entry_credit_or_debit = actual;

        let expected = package.expected_credit_or_debit;
        let tolerance = expected.abs() * self.config.entry_tolerance_pct;
        if (actual - expected).abs() > tolerance.max(1.0) {
            package.state = PackageState::Broken;
            tracing::error!(
                package_id = %package.package_id,
                expected,
                actual,
                "entry credit/debit outside tolerance, marking package BROKEN"
            );
        }
        Ok(())
    }

    /// Refreshes per-bar quotes/greeks, marks every leg, advances the broken
    /// and pending-timeout trackers. Call once per bar for every open package.
    pub fn mark(&mut self, id: &str, chain: &dyn OptionsChainSource, bar_index: u32) -> EngineResult<()> {
        let package = self.packages.get_mut(id).ok_or_else(|| EngineError::InvariantViolation(format!("unknown package {id}")))?;

        if package.any_leg_pending() {
            let since = self.pending_since_bar.entry(id.to_string()).or_insert(bar_index);
            if bar_index.saturating_sub(*since) >= self.config.broken_timeout_bars {
                package.state = PackageState::Broken;
                tracing::error!(package_id = %id, "leg still pending past broken_timeout_bars, marking BROKEN");
            }
            return Ok(());
        }
        self.pending_since_bar.remove(id);

        if package.state != PackageState::Open && package.state != PackageState::Closing {
            return Ok(());
        }

        for leg in &mut package.legs {
            if let Some(quote) = chain.quote(&package.symbol, leg.right, leg.strike, leg.expiry) {
                leg.delta = quote.delta;
                leg.gamma = quote.gamma;
                leg.theta = quote.theta;
                leg.vega = quote.vega;
                leg.iv = quote.iv;
                leg.mark_unrealized(quote.mark());
            }
        }
        package.bars_held += 1;

        debug_assert!(
            (package.legs_unrealized_pnl() - package.legs.iter().map(|l| l.unrealized_pnl).sum::<f64>()).abs() < 0.01
        );
        Ok(())
    }

    /// First-match-wins exit-rule evaluation for an OPEN package (spec.md §4.7).
    /// Returns `None` for a package that is CLOSING/CLOSED/BROKEN — exits are idempotent.
    pub fn evaluate_exit(&self, id: &str, regime: &RegimeSignal) -> Option<ExitReason> {
        let package = self.packages.get(id)?;
        if package.state != PackageState::Open {
            return None;
        }

        let pnl = package.legs_unrealized_pnl();
        let entry_magnitude = package.entry_credit_or_debit.abs();

        match package.strategy {
            Strategy::ThetaHarvester => {
                if pnl >= self.config.theta_take_profit_pct * entry_magnitude {
                    return Some(ExitReason::TakeProfit);
                }
                if pnl <= -self.config.theta_stop_loss_pct * entry_magnitude {
                    return Some(ExitReason::StopLoss);
                }
                let current_iv = package.legs.iter().map(|l| l.iv).sum::<f64>() / package.legs.len() as f64;
                if package.entry_iv > 0.0 && current_iv <= package.entry_iv * (1.0 - self.config.theta_iv_collapse_pct) {
                    return Some(ExitReason::IvCollapse);
                }
                if regime.regime != Regime::Compression {
                    return Some(ExitReason::RegimeLeftCompression);
                }
                None
            }
            Strategy::GammaScalper => {
                if pnl >= self.config.gamma_take_profit_pct * entry_magnitude {
                    return Some(ExitReason::TakeProfit);
                }
                if pnl <= -self.config.gamma_stop_loss_pct * entry_magnitude {
                    return Some(ExitReason::StopLoss);
                }
                if regime.gex_regime == GexRegime::Positive {
                    return Some(ExitReason::GexFlippedPositive);
                }
                if package.bars_held >= self.config.gamma_max_hold_bars {
                    return Some(ExitReason::MaxHoldReached);
                }
                None
            }
        }
    }

    /// Submits closing orders for both legs and, once filled, moves the
    /// package to the ledger. Idempotent: a package already CLOSING/CLOSED
    /// is left untouched and this returns `Ok(false)`.
    pub async fn exit(
        &mut self,
        id: &str,
        reason: ExitReason,
        as_of: DateTime<Utc>,
        chain: &dyn OptionsChainSource,
        broker: &dyn BrokerClient,
    ) -> EngineResult<bool> {
        let package = match self.packages.get_mut(id) {
            Some(p) => p,
            None => {
                // Already moved to the ledger by a prior call, or never existed — idempotent no-op.
                return Ok(false);
            }
        };
        if package.state != PackageState::Open {
            return Ok(false);
        }
        package.state = PackageState::Closing;
        package.exit_reason = Some(reason.as_str().to_string());

        for leg in &mut package.legs {
            let closing_side = match leg.side {
                Side::Long => OrderSide::Sell,
                Side::Short => OrderSide::Buy,
            };
            let mark = chain
                .quote(&package.symbol, leg.right, leg.strike, leg.expiry)
                .map(|q| q.mark())
                .unwrap_or(leg.last_mark);

            let order = Order {
                client_order_id: format!("{id}-close-{}", leg.leg_id),
                symbol: package.symbol.clone(),
                contract_symbol: Some(leg.contract_symbol.clone()),
                side: closing_side,
                quantity: leg.quantity as u64,
                reason: reason.as_str().to_string(),
            };
            let result = broker.submit(&order, mark).await.map_err(|e| EngineError::BrokerTimeout(e.to_string()))?;

            leg.realized_pnl = leg.side.sign() * (result.fill_price - leg.avg_entry_price) * leg.quantity as f64 * 100.0;
            leg.fill_status = fill_status_of(result.status);
            leg.unrealized_pnl = 0.0;
        }

        if package.all_legs_filled() {
            package.state = PackageState::Closed;
            package.exit_time = Some(as_of);
            let closed = self.packages.remove(id).expect("just looked up by id");
            self.ledger.push(closed);
            Ok(true)
        } else {
            tracing::error!(package_id = %id, "closing order left a leg unfilled, marking BROKEN");
            if let Some(p) = self.packages.get_mut(id) {
                p.state = PackageState::Broken;
            }
            Ok(false)
        }
    }
}

fn fill_status_of(status: OrderStatus) -> FillStatus {
    match status {
        OrderStatus::Filled => FillStatus::Filled,
        OrderStatus::Partial => FillStatus::Partial,
        OrderStatus::Rejected => FillStatus::Rejected,
        OrderStatus::Accepted => FillStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::OptionQuote;
    use broker::PaperBroker;
    use chrono::TimeZone;
    use engine_core::{Bias, Direction, InstrumentKind, OptionMeta, StrikePolicy, VolatilityBucket};
    use std::collections::HashMap as StdHashMap;

    struct FixedChain {
        iv: std::sync::Mutex<f64>,
    }

    impl OptionsChainSource for FixedChain {
        fn expiries(&self, _symbol: &str, as_of: DateTime<Utc>, _dte_window: (i64, i64)) -> Vec<DateTime<Utc>> {
            vec![as_of + chrono::Duration::days(35)]
        }

        fn strikes(&self, _symbol: &str, _expiry: DateTime<Utc>, _right: Right) -> Vec<f64> {
            vec![100.0]
        }

        fn quote(&self, _symbol: &str, right: Right, strike: f64, expiry: DateTime<Utc>) -> Option<OptionQuote> {
            let iv = *self.iv.lock().unwrap();
            Some(OptionQuote {
                strike,
                expiry,
                right,
                bid: 1.95,
                ask: 2.05,
                iv,
                delta: if right == Right::Call { 0.5 } else { -0.5 },
                gamma: 0.02,
                theta: -0.03,
                vega: 0.10,
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn theta_intent() -> FinalIntent {
        FinalIntent {
            symbol: "SPY".into(),
            position_delta: 0.0,
            confidence: 0.8,
            primary_agent: "theta_harvester".into(),
            contributors: vec!["theta_harvester".into()],
            reason: "compression + high iv percentile".into(),
            instrument_kind: InstrumentKind::OptionPackage,
            option_meta: Some(OptionMeta {
                package_kind: PackageKind::Straddle,
                side: Side::Short,
                strike_policy: StrikePolicy::AtTheMoney,
                dte_window: (25, 45),
                contracts: 1,
            }),
        }
    }

    fn regime(r: Regime) -> RegimeSignal {
        RegimeSignal {
            symbol: "SPY".into(),
            timestamp: now(),
            regime: r,
            direction: Direction::Sideways,
            volatility: VolatilityBucket::Low,
            bias: Bias::Neutral,
            confidence: 0.8,
            gex_regime: GexRegime::Unknown,
            gex_strength: 0.0,
            iv_percentile: Some(0.8),
            features: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn open_short_straddle_computes_entry_credit() {
        let mut manager = OptionsPackageManager::new(ManagerConfig::default());
        let chain = FixedChain { iv: std::sync::Mutex::new(0.40) };
        let broker = PaperBroker::new(1, 100_000.0, 0.0);

        let id = manager.open(&theta_intent(), 100.0, now(), &chain, &broker).await.unwrap();
        let package = manager.get(&id).unwrap();

        assert_eq!(package.state, PackageState::Open);
        // Short straddle: both legs sold at the 2.00 mid mark, so the credit is negative.
        assert!(package.entry_credit_or_debit < 0.0);
    }

    #[tokio::test]
    async fn take_profit_fires_and_exit_moves_to_ledger() {
        let mut manager = OptionsPackageManager::new(ManagerConfig::default());
        let chain = FixedChain { iv: std::sync::Mutex::new(0.40) };
        let broker = PaperBroker::new(2, 100_000.0, 0.0);

        let id = manager.open(&theta_intent(), 100.0, now(), &chain, &broker).await.unwrap();
        manager.mark(&id, &chain, 1).unwrap();

        // Collapse the mark to simulate the short straddle decaying most of its value.
        {
            let package = manager.packages.get_mut(&id).unwrap();
            for leg in &mut package.legs {
                leg.mark_unrealized(0.10);
            }
        }

        let reason = manager.evaluate_exit(&id, &regime(Regime::Compression));
        assert_eq!(reason, Some(ExitReason::TakeProfit));

        let closed = manager.exit(&id, reason.unwrap(), now(), &chain, &broker).await.unwrap();
        assert!(closed);
        assert!(manager.get(&id).is_none());
        assert_eq!(manager.ledger().len(), 1);
    }

    #[tokio::test]
    async fn mark_orphaned_flags_the_ledger_entry() {
        let mut manager = OptionsPackageManager::new(ManagerConfig::default());
        let chain = FixedChain { iv: std::sync::Mutex::new(0.40) };
        let broker = PaperBroker::new(4, 100_000.0, 0.0);

        let id = manager.open(&theta_intent(), 100.0, now(), &chain, &broker).await.unwrap();
        manager.exit(&id, ExitReason::TakeProfit, now(), &chain, &broker).await.unwrap();

        assert!(!manager.ledger()[0].orphaned);
        assert!(manager.mark_orphaned(&id));
        assert!(manager.ledger()[0].orphaned);
        assert!(!manager.mark_orphaned("unknown-id"));
    }

    #[tokio::test]
    async fn exit_is_idempotent_once_closed() {
        let mut manager = OptionsPackageManager::new(ManagerConfig::default());
        let chain = FixedChain { iv: std::sync::Mutex::new(0.40) };
        let broker = PaperBroker::new(3, 100_000.0, 0.0);

        let id = manager.open(&theta_intent(), 100.0, now(), &chain, &broker).await.unwrap();
        let first = manager.exit(&id, ExitReason::TakeProfit, now(), &chain, &broker).await.unwrap();
        let second = manager.exit(&id, ExitReason::TakeProfit, now(), &chain, &broker).await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(manager.ledger().len(), 1);
    }
}
