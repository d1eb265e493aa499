//! The bar loop (spec.md §4.10/§5): drives `BarSource` → `FeatureEngine` →
//! `RegimeClassifier` → agents → `MetaPolicy` → `RiskGate` → dispatch →
//! package marking/exit → delta hedge, strictly sequential per symbol per
//! bar, with a recovery snapshot after every committed bar.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use agents::{Agent, DirectionalAgent, GammaScalperAgent, MeanReversionAgent, ThetaHarvesterAgent, VolatilityAgent};
use bar_source::{BarEvent, BarSource};
use broker::BrokerClient;
use chrono::Utc;
use delta_hedger::DeltaHedger;
use engine_core::{
    EngineResult, InstrumentKind, KillSwitch, Order, OrderSide, OrderStatus, Package, PackageState,
    Position, Regime, RegimeSignal, RiskDecision, RiskState,
};
use feature_engine::FeatureEngine;
use meta_policy::MetaPolicy;
use options_package_manager::{OptionsChainSource, OptionsPackageManager};
use regime_classifier::RegimeClassifier;
use risk_gate::{Account, RiskConfig};
use state_store::EngineSnapshotStore;

use crate::config::EngineConfig;
use crate::microstructure::MicrostructureProvider;

/// Run state machine (spec.md §4.10): `IDLE → STARTING → RUNNING →
/// (STOPPING → STOPPED) | ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

const GEX_REFRESH_MINUTES: i64 = 5;
const GEX_REFRESH_MOVE_PCT: f64 = 0.01;

struct MicrostructureCache {
    last_refresh: chrono::DateTime<Utc>,
    last_price: f64,
}

pub struct Engine {
    state: EngineState,
    config: EngineConfig,
    bar_source: Box<dyn BarSource>,
    feature_engines: HashMap<String, FeatureEngine>,
    regime_classifier: RegimeClassifier,
    agents: Vec<Box<dyn Agent>>,
    meta_policy: MetaPolicy,
    risk_config: RiskConfig,
    risk_state: RiskState,
    broker: Arc<dyn BrokerClient>,
    options_manager: OptionsPackageManager,
    delta_hedger: DeltaHedger,
    chain_source: Arc<dyn OptionsChainSource + Send + Sync>,
    micro: Box<dyn MicrostructureProvider>,
    store: Option<EngineSnapshotStore>,
    symbol_exposure: HashMap<String, f64>,
    regime_exposure: HashMap<Regime, f64>,
    micro_cache: HashMap<String, MicrostructureCache>,
    bar_index: u64,
    stop_requested: Arc<AtomicBool>,
    last_error: Option<String>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        bar_source: Box<dyn BarSource>,
        broker: Arc<dyn BrokerClient>,
        chain_source: Arc<dyn OptionsChainSource + Send + Sync>,
        micro: Box<dyn MicrostructureProvider>,
        store: Option<EngineSnapshotStore>,
    ) -> Self {
        let agents: Vec<Box<dyn Agent>> = vec![
            Box::new(DirectionalAgent::default()),
            Box::new(VolatilityAgent::default()),
            Box::new(MeanReversionAgent::default()),
            Box::new(ThetaHarvesterAgent::default()),
            Box::new(GammaScalperAgent::default()),
        ];

        let risk_config = config.risk.clone();
        let options_manager = OptionsPackageManager::new(config.options.clone());
        let delta_hedger = DeltaHedger::new(config.delta_hedge.clone());
        let risk_state = RiskState::new(config.starting_equity);

        let mut feature_engines = HashMap::new();
        for symbol in &config.symbols {
            feature_engines.insert(symbol.clone(), FeatureEngine::with_min_bars(config.min_bars_for_features));
        }

        let mut meta_policy = MetaPolicy::default();
        meta_policy.optionable_symbols =
            config.optionable_symbols.as_ref().map(|symbols| symbols.iter().cloned().collect());

        Self {
            state: EngineState::Idle,
            config,
            bar_source,
            feature_engines,
            regime_classifier: RegimeClassifier::new(),
            agents,
            meta_policy,
            risk_config,
            risk_state,
            broker,
            options_manager,
            delta_hedger,
            chain_source,
            micro,
            store,
            symbol_exposure: HashMap::new(),
            regime_exposure: HashMap::new(),
            micro_cache: HashMap::new(),
            bar_index: 0,
            stop_requested: Arc::new(AtomicBool::new(false)),
            last_error: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    /// A cloneable flag external callers use to request a graceful stop
    /// (`RUNNING → STOPPING`, returns once the in-flight bar completes).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    pub async fn start(&mut self) -> EngineResult<()> {
        self.state = EngineState::Starting;
        self.bar_source.connect().await?;
        self.bar_source.subscribe(&self.config.symbols, self.config.min_bars_for_features).await?;

        if let Some(store) = &self.store {
            if let Some(restored) = store.load_risk_state().await.ok().flatten() {
                self.risk_state = restored;
                tracing::info!("restored risk state from snapshot");
            }
        }

        self.state = EngineState::Running;
        tracing::info!(symbols = ?self.config.symbols, "scheduler running");
        Ok(())
    }

    /// Runs until `EndOfStream` on any symbol (replay) or an external stop
    /// request is observed between bars.
    pub async fn run(&mut self) -> EngineResult<()> {
        self.start().await?;

        'outer: loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                self.state = EngineState::Stopping;
                break;
            }

            let symbols: Vec<String> = self.config.symbols.clone();
            for symbol in &symbols {
                let timeout = StdDuration::from_secs(5);
                let event = match self.bar_source.next_bar(symbol, timeout).await {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(symbol = %symbol, error = %e, "bar source error, continuing");
                        continue;
                    }
                };

                match event {
                    BarEvent::EndOfStream => {
                        tracing::info!(symbol = %symbol, "end of stream, shutting down flat");
                        self.shutdown_flat().await;
                        self.state = EngineState::Stopped;
                        break 'outer;
                    }
                    BarEvent::None => continue,
                    BarEvent::Bar(bar) => {
                        if !bar.matches(symbol) {
                            tracing::error!(expected = %symbol, actual = %bar.symbol, "dropping mismatched bar");
                            continue;
                        }
                        if let Err(e) = self.process_bar(symbol, bar).await {
                            tracing::error!(symbol = %symbol, error = %e, "error processing bar");
                            self.last_error = Some(e.to_string());
                        }
                    }
                }
            }

            self.bar_index += 1;
            self.persist_snapshot().await;

            if self.stop_requested.load(Ordering::SeqCst) {
                self.state = EngineState::Stopping;
                break;
            }

            if self.config.feed == crate::config::FeedMode::Replay {
                let speed = self.config.replay.replay_speed.max(0.000_001);
                if speed < 600.0 {
                    let bar_interval_secs = 60.0; // 1-minute bars; TODO: derive from configured bar granularity once intraday timeframes are configurable.
                    let sleep_secs = bar_interval_secs / speed;
                    tokio::time::sleep(StdDuration::from_secs_f64(sleep_secs.max(0.0))).await;
                }
            }
        }

        if self.state == EngineState::Stopping {
            self.state = EngineState::Stopped;
        }
        Ok(())
    }

    /// Steps 3–6 of spec.md §4.10 for one symbol's bar.
    async fn process_bar(&mut self, symbol: &str, bar: engine_core::Bar) -> EngineResult<()> {
        let feature_engine = self
            .feature_engines
            .entry(symbol.to_string())
            .or_insert_with(|| FeatureEngine::with_min_bars(self.config.min_bars_for_features));
        let features = feature_engine.update(bar.clone());

        if !features.ready {
            tracing::debug!(symbol = %symbol, bars_seen = features.bars_seen, "feature engine not ready, skipping");
            return Ok(());
        }

        let mut signal = match self.regime_classifier.classify(symbol, &features) {
            Some(signal) => signal,
            None => return Ok(()),
        };
        self.refresh_microstructure(symbol, bar.close, &mut signal);

        self.mark_and_hedge(symbol, &bar, &signal).await?;
        self.evaluate_new_intent(symbol, &bar, &signal).await?;

        Ok(())
    }

    fn refresh_microstructure(&mut self, symbol: &str, price: f64, signal: &mut RegimeSignal) {
        let now = Utc::now();
        let needs_refresh = match self.micro_cache.get(symbol) {
            Some(cache) => {
                let elapsed = now - cache.last_refresh;
                let moved = cache.last_price > 0.0 && ((price - cache.last_price).abs() / cache.last_price) >= GEX_REFRESH_MOVE_PCT;
                elapsed >= chrono::Duration::minutes(GEX_REFRESH_MINUTES) || moved
            }
            None => true,
        };

        if needs_refresh {
            let (gex_regime, gex_strength) = self.micro.gex(symbol, price);
            signal.gex_regime = gex_regime;
            signal.gex_strength = gex_strength;
            signal.iv_percentile = self.micro.iv_percentile(symbol);
            self.micro_cache.insert(symbol.to_string(), MicrostructureCache { last_refresh: now, last_price: price });
        }
    }

    /// Mark-to-market existing option packages, hedge long-gamma ones, then
    /// evaluate exits — strictly before any new-intent step (spec.md §5).
    async fn mark_and_hedge(&mut self, symbol: &str, bar: &engine_core::Bar, signal: &RegimeSignal) -> EngineResult<()> {
        let package_ids: Vec<String> = self
            .options_manager
            .open_packages()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.package_id.clone())
            .collect();

        for id in &package_ids {
            self.options_manager.mark(id, self.chain_source.as_ref(), self.bar_index as u32)?;

            let package = match self.options_manager.get(id) {
                Some(p) => p.clone(),
                None => continue,
            };

            if package.state == PackageState::Open {
                if let Some(result) = self
                    .delta_hedger
                    .hedge(&package, self.bar_index, bar.close, self.broker.as_ref(), false)
                    .await?
                {
                    tracing::info!(package_id = %id, shares = result.fill_qty, price = result.fill_price, "delta hedge fill");
                }
            }

            if let Some(reason) = self.options_manager.evaluate_exit(id, signal) {
                tracing::info!(package_id = %id, reason = reason.as_str(), "package exit rule fired");
                // Flatten any outstanding delta hedge before the package leaves
                // the manager's live map — once it's in the ledger there's no
                // further per-bar hook to unwind leftover shares against.
                self.delta_hedger
                    .hedge(&package, self.bar_index, bar.close, self.broker.as_ref(), true)
                    .await?;
                let closed = self
                    .options_manager
                    .exit(id, reason, Utc::now(), self.chain_source.as_ref(), self.broker.as_ref())
                    .await?;
                if closed {
                    if let Some(closed_package) = self.options_manager.ledger().last() {
                        self.record_exposure_release(closed_package);
                    }
                }
            } else if self.delta_hedger.check_orphan(&package, self.bar_index) {
                self.options_manager.mark_orphaned(id);
                self.delta_hedger
                    .hedge(&package, self.bar_index, bar.close, self.broker.as_ref(), true)
                    .await?;
            }
        }

        Ok(())
    }

    async fn evaluate_new_intent(&mut self, symbol: &str, bar: &engine_core::Bar, signal: &RegimeSignal) -> EngineResult<()> {
        let intents: Vec<_> = self.agents.iter().filter_map(|agent| agent.evaluate(bar, signal)).collect();
        let final_intent = self.meta_policy.decide(signal, &intents);
        if final_intent.is_hold() {
            return Ok(());
        }

        let account = self.build_account(symbol).await;
        let decision = risk_gate::size(&final_intent, &account, &self.risk_state, signal, bar.close, &self.risk_config);

        match decision {
            RiskDecision::Block { reason, detail } => {
                tracing::warn!(symbol = %symbol, reason = ?reason, detail = %detail, "risk gate blocked intent");
                *self.risk_state.blocks_by_strategy.entry(final_intent.primary_agent.clone()).or_insert(0) += 1;
            }
            RiskDecision::Order(order) => match final_intent.instrument_kind {
                InstrumentKind::Stock => {
                    self.dispatch_stock_order(symbol, &order, bar.close).await?;
                }
                InstrumentKind::OptionPackage => {
                    match self
                        .options_manager
                        .open(&final_intent, bar.close, Utc::now(), self.chain_source.as_ref(), self.broker.as_ref())
                        .await
                    {
                        Ok(id) => tracing::info!(package_id = %id, "opened option package"),
                        Err(e) => tracing::warn!(symbol = %symbol, error = %e, "failed to open option package"),
                    }
                }
                InstrumentKind::OptionSingle => {
                    tracing::warn!(symbol = %symbol, "single-leg option intents are not dispatched, no agent produces them today");
                }
            },
        }

        Ok(())
    }

    async fn dispatch_stock_order(&mut self, symbol: &str, order: &Order, mark_price: f64) -> EngineResult<()> {
        let result = self
            .broker
            .submit(order, mark_price)
            .await
            .map_err(|e| engine_core::EngineError::BrokerTimeout(e.to_string()))?;

        if result.status == OrderStatus::Filled || result.status == OrderStatus::Partial {
            let notional = result.fill_price * result.fill_qty as f64;
            let signed = match order.side {
                OrderSide::Buy => notional,
                OrderSide::Sell => -notional,
            };
            *self.symbol_exposure.entry(symbol.to_string()).or_insert(0.0) += signed.abs();
            tracing::info!(symbol = %symbol, qty = result.fill_qty, price = result.fill_price, "stock order filled");
        }
        Ok(())
    }

    fn record_exposure_release(&mut self, package: &Package) {
        self.symbol_exposure.remove(&package.symbol);
    }

    async fn build_account(&self, symbol: &str) -> Account {
        let equity = self.broker.account_equity().await.unwrap_or(self.risk_state.current_equity);
        let positions = self.broker.positions().await.unwrap_or_default();
        let existing: Option<&Position> = positions.iter().find(|p| p.symbol == symbol);
        let existing_position_qty = existing.map(|p| p.quantity).unwrap_or(0);

        let hedge_shares: i64 = self
            .options_manager
            .open_packages()
            .filter(|p| p.symbol == symbol)
            .filter_map(|p| self.delta_hedger.state(&p.package_id))
            .map(|s| s.current_shares)
            .sum();

        Account {
            equity,
            existing_position_qty,
            existing_symbol_exposure: self.symbol_exposure.get(symbol).copied().unwrap_or(0.0),
            existing_regime_exposure: self.regime_exposure.values().copied().sum(),
            current_hedge_shares: existing_position_qty + hedge_shares,
        }
    }

    /// EndOfStream / external stop handling: flatten every hedge so the run
    /// ends with no orphaned option-delta exposure (spec.md §4.10).
    async fn shutdown_flat(&mut self) {
        let package_ids: Vec<String> = self.options_manager.open_packages().map(|p| p.package_id.clone()).collect();
        for id in package_ids {
            if let Some(package) = self.options_manager.get(&id).cloned() {
                if let Err(e) = self.delta_hedger.hedge(&package, self.bar_index, package.legs.first().map(|l| l.last_mark).unwrap_or(0.0), self.broker.as_ref(), true).await {
                    tracing::error!(package_id = %id, error = %e, "failed to flatten hedge on shutdown");
                }
            }
        }
        self.persist_snapshot().await;
    }

    async fn persist_snapshot(&self) {
        let Some(store) = &self.store else { return };
        let positions = self.broker.positions().await.unwrap_or_default();
        let packages: Vec<Package> = self.options_manager.open_packages().cloned().collect();
        let hedge_states: Vec<_> = packages.iter().filter_map(|p| self.delta_hedger.state(&p.package_id).cloned()).collect();

        if let Err(e) = store.save_all(&self.risk_state, &positions, &packages, &hedge_states).await {
            tracing::warn!(error = %e, "failed to persist engine snapshot");
        }
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk_state
    }

    pub fn set_kill_switch(&mut self, kill_switch: KillSwitch) {
        self.risk_state.kill_switch = kill_switch;
    }
}

/// End-to-end bar-loop scenarios (spec.md §8): each test drives the real
/// pipeline (`process_bar`/`evaluate_new_intent`/`mark_and_hedge`) against
/// fixed test doubles instead of hand-built intermediate structs, so a
/// regression anywhere in the wiring shows up here rather than only in a
/// single crate's unit tests.
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker::PaperBroker;
    use chrono::Duration as ChronoDuration;
    use engine_core::{Bar, Bias, Direction, OrderResult, PackageKind, Right, Side, VolatilityBucket};
    use options_package_manager::OptionQuote;
    use risk_gate::RiskConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ---------------------------------------------------------------
    // Test doubles
    // ---------------------------------------------------------------

    /// A multi-strike/multi-right chain whose quotes can be mutated in place
    /// across bars, mirroring `options_package_manager::contracts`'s own
    /// test-only `FixedChain` but with interior mutability.
    struct FixedChain {
        quotes: StdMutex<HashMap<(i64, bool), OptionQuote>>,
    }

    impl FixedChain {
        fn new() -> Self {
            Self { quotes: StdMutex::new(HashMap::new()) }
        }

        fn set(&self, strike: f64, right: Right, mark: f64, delta: f64) {
            let quote = OptionQuote {
                strike,
                expiry: Utc::now(),
                right,
                bid: mark - 0.01,
                ask: mark + 0.01,
                iv: 0.40,
                delta,
                gamma: 0.05,
                theta: -0.02,
                vega: 0.10,
            };
            self.quotes.lock().unwrap().insert((strike as i64, right == Right::Call), quote);
        }

        fn set_mark(&self, strike: f64, right: Right, mark: f64) {
            if let Some(q) = self.quotes.lock().unwrap().get_mut(&(strike as i64, right == Right::Call)) {
                q.bid = mark - 0.01;
                q.ask = mark + 0.01;
            }
        }

        fn set_delta(&self, strike: f64, right: Right, delta: f64) {
            if let Some(q) = self.quotes.lock().unwrap().get_mut(&(strike as i64, right == Right::Call)) {
                q.delta = delta;
            }
        }
    }

    impl OptionsChainSource for FixedChain {
        fn expiries(&self, _symbol: &str, as_of: chrono::DateTime<Utc>, _dte_window: (i64, i64)) -> Vec<chrono::DateTime<Utc>> {
            vec![as_of + ChronoDuration::days(35)]
        }

        fn strikes(&self, _symbol: &str, _expiry: chrono::DateTime<Utc>, right: Right) -> Vec<f64> {
            self.quotes
                .lock()
                .unwrap()
                .keys()
                .filter(|(_, is_call)| *is_call == (right == Right::Call))
                .map(|(strike, _)| *strike as f64)
                .collect()
        }

        fn quote(&self, _symbol: &str, right: Right, strike: f64, expiry: chrono::DateTime<Utc>) -> Option<OptionQuote> {
            self.quotes
                .lock()
                .unwrap()
                .get(&(strike as i64, right == Right::Call))
                .copied()
                .map(|mut q| {
                    q.expiry = expiry;
                    q
                })
        }
    }

    /// Fixed GEX/IV microstructure with a mutator for the gamma-scalper exit scenario.
    struct FixedMicro {
        gex_regime: StdMutex<engine_core::GexRegime>,
        gex_strength: f64,
        iv_percentile: Option<f64>,
    }

    impl FixedMicro {
        fn new(gex_regime: engine_core::GexRegime, gex_strength: f64, iv_percentile: Option<f64>) -> Self {
            Self { gex_regime: StdMutex::new(gex_regime), gex_strength, iv_percentile }
        }
    }

    impl MicrostructureProvider for FixedMicro {
        fn gex(&self, _symbol: &str, _spot: f64) -> (engine_core::GexRegime, f64) {
            (*self.gex_regime.lock().unwrap(), self.gex_strength)
        }

        fn iv_percentile(&self, _symbol: &str) -> Option<f64> {
            self.iv_percentile
        }
    }

    /// Wraps `PaperBroker` and force-rejects any leg whose contract symbol
    /// marks it a put, to exercise the broken-leg path (spec.md §4.7) without
    /// a dedicated mock-broker crate.
    struct RejectPutBroker {
        inner: PaperBroker,
    }

    impl RejectPutBroker {
        fn new(seed: u64, starting_equity: f64) -> Self {
            Self { inner: PaperBroker::new(seed, starting_equity, 0.0) }
        }
    }

    #[async_trait]
    impl BrokerClient for RejectPutBroker {
        async fn submit(&self, order: &Order, mark_price: f64) -> anyhow::Result<OrderResult> {
            let is_put = order.contract_symbol.as_deref().map(|s| s.contains("-P-")).unwrap_or(false);
            if is_put {
                return Ok(OrderResult {
                    order_id: format!("rejected-{}", order.client_order_id),
                    client_order_id: order.client_order_id.clone(),
                    status: OrderStatus::Rejected,
                    fill_qty: 0,
                    fill_price: 0.0,
                    timestamp: Utc::now(),
                });
            }
            self.inner.submit(order, mark_price).await
        }

        async fn cancel(&self, order_id: &str) -> anyhow::Result<()> {
            self.inner.cancel(order_id).await
        }

        async fn positions(&self) -> anyhow::Result<Vec<Position>> {
            self.inner.positions().await
        }

        async fn account_equity(&self) -> anyhow::Result<f64> {
            self.inner.account_equity().await
        }
    }

    /// A queue-backed `BarSource`: each symbol gets its own FIFO of
    /// `BarEvent`s, exhausted ones falling back to `EndOfStream`.
    struct TestBarSource {
        queues: StdMutex<HashMap<String, VecDeque<BarEvent>>>,
    }

    impl TestBarSource {
        fn new(queues: HashMap<String, VecDeque<BarEvent>>) -> Self {
            Self { queues: StdMutex::new(queues) }
        }
    }

    #[async_trait]
    impl BarSource for TestBarSource {
        async fn connect(&mut self) -> EngineResult<()> {
            Ok(())
        }

        async fn subscribe(&mut self, _symbols: &[String], _preload_n: usize) -> EngineResult<()> {
            Ok(())
        }

        async fn next_bar(&mut self, symbol: &str, _timeout: StdDuration) -> EngineResult<BarEvent> {
            let mut queues = self.queues.lock().unwrap();
            Ok(queues.get_mut(symbol).and_then(|q| q.pop_front()).unwrap_or(BarEvent::EndOfStream))
        }

        async fn next_batch(&mut self, _symbol: &str, _k: usize) -> EngineResult<Vec<Bar>> {
            Ok(Vec::new())
        }
    }

    struct NoopBarSource;

    #[async_trait]
    impl BarSource for NoopBarSource {
        async fn connect(&mut self) -> EngineResult<()> {
            Ok(())
        }
        async fn subscribe(&mut self, _symbols: &[String], _preload_n: usize) -> EngineResult<()> {
            Ok(())
        }
        async fn next_bar(&mut self, _symbol: &str, _timeout: StdDuration) -> EngineResult<BarEvent> {
            Ok(BarEvent::None)
        }
        async fn next_batch(&mut self, _symbol: &str, _k: usize) -> EngineResult<Vec<Bar>> {
            Ok(Vec::new())
        }
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn test_config(symbols: &[&str]) -> EngineConfig {
        EngineConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            broker: crate::config::BrokerKind::Paper,
            feed: crate::config::FeedMode::Replay,
            replay: crate::config::ReplayConfig::default(),
            strict_data_mode: true,
            risk: RiskConfig::default(),
            delta_hedge: delta_hedger::HedgerConfig::default(),
            options: options_package_manager::ManagerConfig::default(),
            strategy_params: crate::config::StrategyParams::default(),
            min_bars_for_features: 30,
            seed: 42,
            starting_equity: 100_000.0,
            slippage_bps: 0.0,
            optionable_symbols: None,
            polygon_api_key: String::new(),
        }
    }

    fn flat_bar(symbol: &str, price: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 100_000.0,
        }
    }

    fn base_signal(symbol: &str, regime: Regime) -> RegimeSignal {
        RegimeSignal {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            regime,
            direction: Direction::Sideways,
            volatility: VolatilityBucket::Medium,
            bias: Bias::Neutral,
            confidence: 0.8,
            gex_regime: engine_core::GexRegime::Unknown,
            gex_strength: 0.0,
            iv_percentile: None,
            features: HashMap::new(),
        }
    }

    fn engine_with(
        symbols: &[&str],
        broker: Arc<dyn BrokerClient>,
        chain: Arc<dyn OptionsChainSource + Send + Sync>,
        micro: Box<dyn MicrostructureProvider>,
        bar_source: Box<dyn BarSource>,
    ) -> Engine {
        Engine::new(test_config(symbols), bar_source, broker, chain, micro, None)
    }

    // ---------------------------------------------------------------
    // Scenario 1: feature warmup then a theta-harvester straddle entry
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn warmup_then_theta_harvester_opens_straddle() {
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(1, 100_000.0, 0.0));
        let chain = FixedChain::new();
        chain.set(450.0, Right::Call, 2.05, 0.3);
        chain.set(450.0, Right::Put, 2.05, -0.3);
        let chain: Arc<dyn OptionsChainSource + Send + Sync> = Arc::new(chain);
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Unknown, 0.0, Some(0.80)));
        let mut engine = engine_with(&["SPY"], broker, chain, micro, Box::new(NoopBarSource));

        let bar = flat_bar("SPY", 450.0);
        for _ in 0..29 {
            engine.process_bar("SPY", bar.clone()).await.unwrap();
        }
        assert!(engine.options_manager.open_packages().next().is_none());
        assert_eq!(engine.feature_engines.get("SPY").unwrap().bars_seen(), 29);

        engine.process_bar("SPY", bar.clone()).await.unwrap();

        let packages: Vec<_> = engine.options_manager.open_packages().collect();
        assert_eq!(packages.len(), 1, "theta harvester should have opened exactly one package");
        let package = packages[0];
        assert_eq!(package.kind, PackageKind::Straddle);
        assert_eq!(package.side, engine_core::Side::Short);
        assert_eq!(package.strategy, engine_core::Strategy::ThetaHarvester);
        assert_eq!(package.state, PackageState::Open);
    }

    // ---------------------------------------------------------------
    // Scenario 2: theta-harvester take-profit exit
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn theta_harvester_take_profit_closes_package() {
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(2, 100_000.0, 0.0));
        let chain = Arc::new(FixedChain::new());
        chain.set(450.0, Right::Call, 2.05, 0.3);
        chain.set(450.0, Right::Put, 2.05, -0.3);
        let chain_dyn: Arc<dyn OptionsChainSource + Send + Sync> = chain.clone();
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Unknown, 0.0, Some(0.80)));
        let mut engine = engine_with(&["SPY"], broker, chain_dyn, micro, Box::new(NoopBarSource));

        let mut signal = base_signal("SPY", Regime::Compression);
        signal.volatility = VolatilityBucket::Low;
        signal.iv_percentile = Some(0.80);
        let bar = flat_bar("SPY", 450.0);

        engine.evaluate_new_intent("SPY", &bar, &signal).await.unwrap();
        let id = engine.options_manager.open_packages().next().unwrap().package_id.clone();

        // Collapse both legs most of the way to zero to trigger the 50% take-profit rule.
        chain.set_mark(450.0, Right::Call, 0.50);
        chain.set_mark(450.0, Right::Put, 0.50);

        engine.mark_and_hedge("SPY", &bar, &signal).await.unwrap();

        assert!(engine.options_manager.get(&id).is_none(), "package should have moved to the ledger");
        let closed = engine.options_manager.ledger().last().unwrap();
        assert_eq!(closed.package_id, id);
        assert_eq!(closed.state, PackageState::Closed);
        assert_eq!(closed.exit_reason.as_deref(), Some("take_profit"));
    }

    // ---------------------------------------------------------------
    // Scenario 3: gamma-scalper hedge round-trip, then a clean exit
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn gamma_scalper_hedges_and_flattens_on_exit() {
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(3, 100_000.0, 0.0));
        let chain = Arc::new(FixedChain::new());
        chain.set(455.0, Right::Call, 3.00, 0.35);
        chain.set(445.0, Right::Put, 3.00, -0.05);
        let chain_dyn: Arc<dyn OptionsChainSource + Send + Sync> = chain.clone();
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Negative, 0.8, Some(0.20)));
        let mut engine = engine_with(&["SPY"], broker, chain_dyn, micro, Box::new(NoopBarSource));

        let mut signal = base_signal("SPY", Regime::Expansion);
        signal.gex_regime = engine_core::GexRegime::Negative;
        signal.iv_percentile = Some(0.20);
        let bar = flat_bar("SPY", 450.0);

        engine.evaluate_new_intent("SPY", &bar, &signal).await.unwrap();
        let id = engine.options_manager.open_packages().next().unwrap().package_id.clone();
        assert_eq!(engine.options_manager.get(&id).unwrap().strategy, engine_core::Strategy::GammaScalper);

        engine.bar_index = 1;
        engine.mark_and_hedge("SPY", &bar, &signal).await.unwrap();
        let after_first = engine.delta_hedger.state(&id).unwrap().current_shares;
        assert_ne!(after_first, 0, "initial hedge should have traded");

        engine.bar_index = 10;
        chain.set_delta(445.0, Right::Put, -0.20);
        engine.mark_and_hedge("SPY", &bar, &signal).await.unwrap();
        let after_second = engine.delta_hedger.state(&id).unwrap().current_shares;
        assert_ne!(after_second, after_first, "rebalancing hedge should have traded again");

        engine.bar_index = 20;
        let mut flipped = signal.clone();
        flipped.gex_regime = engine_core::GexRegime::Positive;
        engine.mark_and_hedge("SPY", &bar, &flipped).await.unwrap();

        assert!(engine.options_manager.get(&id).is_none());
        let closed = engine.options_manager.ledger().last().unwrap();
        assert_eq!(closed.exit_reason.as_deref(), Some("gex_flipped_positive"));
        assert_eq!(
            engine.delta_hedger.state(&id).unwrap().current_shares,
            0,
            "hedge shares must flatten to zero once the package exits"
        );
    }

    // ---------------------------------------------------------------
    // Scenario 4: daily-loss limit blocks entries but not exits
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn daily_loss_limit_blocks_entry_but_allows_exit() {
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(4, 100_000.0, 0.0));
        let chain: Arc<dyn OptionsChainSource + Send + Sync> = Arc::new(crate::chain::NullChain);
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Unknown, 0.0, None));
        let mut engine = engine_with(&["SPY"], Arc::clone(&broker), chain, micro, Box::new(NoopBarSource));

        // Seed an existing long position directly through the broker, bypassing risk sizing.
        let seed_order = Order {
            client_order_id: "seed-buy".into(),
            symbol: "SPY".into(),
            contract_symbol: None,
            side: OrderSide::Buy,
            quantity: 100,
            reason: "test seed".into(),
        };
        broker.submit(&seed_order, 450.0).await.unwrap();

        engine.risk_state.day_start_equity = 100_000.0;
        engine.risk_state.daily_pnl = -4_000.0; // breaches the default 3% daily-loss cap

        let bar = flat_bar("SPY", 450.0);

        let mut same_direction = base_signal("SPY", Regime::Trend);
        same_direction.bias = Bias::Bullish;
        same_direction.direction = Direction::Up;
        same_direction.confidence = 0.8;
        same_direction.features.insert("adx".to_string(), 30.0);

        engine.evaluate_new_intent("SPY", &bar, &same_direction).await.unwrap();
        assert_eq!(engine.risk_state.blocks_by_strategy.get("directional").copied(), Some(1));
        let positions = broker.positions().await.unwrap();
        assert_eq!(positions.iter().find(|p| p.symbol == "SPY").unwrap().quantity, 100);

        let mut opposite_direction = base_signal("SPY", Regime::Trend);
        opposite_direction.bias = Bias::Bearish;
        opposite_direction.direction = Direction::Down;
        opposite_direction.confidence = 0.8;
        opposite_direction.features.insert("adx".to_string(), 30.0);

        engine.evaluate_new_intent("SPY", &bar, &opposite_direction).await.unwrap();
        assert_eq!(
            engine.risk_state.blocks_by_strategy.get("directional").copied(),
            Some(1),
            "the exit must not be blocked, so the counter stays at its prior value"
        );
        let positions = broker.positions().await.unwrap();
        let remaining = positions.iter().find(|p| p.symbol == "SPY").map(|p| p.quantity).unwrap_or(0);
        assert!(remaining < 100, "the opposite-direction intent should have reduced the position");
    }

    // ---------------------------------------------------------------
    // Scenario 5: a rejected leg marks the package BROKEN on entry
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn rejected_put_leg_marks_package_broken() {
        let broker: Arc<dyn BrokerClient> = Arc::new(RejectPutBroker::new(5, 100_000.0));
        let chain = FixedChain::new();
        chain.set(450.0, Right::Call, 2.05, 0.3);
        chain.set(450.0, Right::Put, 2.05, -0.3);
        let chain: Arc<dyn OptionsChainSource + Send + Sync> = Arc::new(chain);
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Unknown, 0.0, Some(0.80)));
        let mut engine = engine_with(&["SPY"], broker, chain, micro, Box::new(NoopBarSource));

        let mut signal = base_signal("SPY", Regime::Compression);
        signal.volatility = VolatilityBucket::Low;
        signal.iv_percentile = Some(0.80);
        let bar = flat_bar("SPY", 450.0);

        engine.evaluate_new_intent("SPY", &bar, &signal).await.unwrap();

        let package = engine.options_manager.open_packages().next().expect("package should have been created, just broken");
        assert_eq!(package.state, PackageState::Broken);
        assert!(engine.options_manager.evaluate_exit(&package.package_id, &signal).is_none());
    }

    // ---------------------------------------------------------------
    // Scenario 6: a mismatched-symbol bar is dropped, not fed to the engine
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn mismatched_symbol_bar_is_dropped_and_stream_ends() {
        let broker: Arc<dyn BrokerClient> = Arc::new(PaperBroker::new(6, 100_000.0, 0.0));
        let chain: Arc<dyn OptionsChainSource + Send + Sync> = Arc::new(crate::chain::NullChain);
        let micro: Box<dyn MicrostructureProvider> = Box::new(FixedMicro::new(engine_core::GexRegime::Unknown, 0.0, None));

        let mut queues = HashMap::new();
        let mut spy_queue = VecDeque::new();
        spy_queue.push_back(BarEvent::Bar(flat_bar("QQQ", 300.0)));
        spy_queue.push_back(BarEvent::EndOfStream);
        queues.insert("SPY".to_string(), spy_queue);
        let bar_source = Box::new(TestBarSource::new(queues));

        let mut engine = engine_with(&["SPY"], broker, chain, micro, bar_source);
        engine.run().await.unwrap();

        assert_eq!(engine.feature_engines.get("SPY").unwrap().bars_seen(), 0);
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
