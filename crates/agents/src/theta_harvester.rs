use engine_core::{
    Direction, InstrumentKind, OptionMeta, PackageKind, Regime, RegimeSignal, Side, StrikePolicy,
    TradeIntent, VolatilityBucket,
};

use crate::Agent;

/// Sells premium in `Regime::Compression` when IV is rich relative to its own
/// trailing range (`iv_percentile`): short strangle/straddle collects theta
/// while price is expected to stay range-bound.
pub struct ThetaHarvesterAgent {
    pub min_iv_percentile: f64,
    pub min_confidence: f64,
    pub dte_window: (i64, i64),
    pub contracts: u32,
}

impl Default for ThetaHarvesterAgent {
    fn default() -> Self {
        Self {
            min_iv_percentile: 0.70,
            min_confidence: 0.5,
            dte_window: (25, 45),
            contracts: 1,
        }
    }
}

impl Agent for ThetaHarvesterAgent {
    fn id(&self) -> &'static str {
        "theta_harvester"
    }

    fn evaluate(
        &self,
        bar: &engine_core::Bar,
        regime: &RegimeSignal,
    ) -> Option<TradeIntent> {
        if regime.regime != Regime::Compression || regime.confidence < self.min_confidence {
            return None;
        }
        if regime.volatility == VolatilityBucket::High {
            return None;
        }
        let iv_pct = regime.iv_percentile?;
        if iv_pct < self.min_iv_percentile {
            return None;
        }
        Some(TradeIntent {
            symbol: bar.symbol.clone(),
            agent_id: self.id().to_string(),
            direction: Direction::Sideways,
            magnitude: iv_pct,
            confidence: regime.confidence,
            reason: format!("compression regime, iv_percentile={iv_pct:.2}, selling premium"),
            instrument_kind: InstrumentKind::OptionPackage,
            option_meta: Some(OptionMeta {
                package_kind: PackageKind::Straddle,
                side: Side::Short,
                strike_policy: StrikePolicy::AtTheMoney,
                dte_window: self.dte_window,
                contracts: self.contracts,
            }),
        })
    }
}
