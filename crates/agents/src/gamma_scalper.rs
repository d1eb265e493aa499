use engine_core::{
    Direction, GexRegime, InstrumentKind, OptionMeta, PackageKind, Regime, RegimeSignal, Side,
    StrikePolicy, TradeIntent,
};

use crate::Agent;

/// Buys premium in `Regime::Expansion` when dealers are short gamma
/// (`gex_regime == Negative`) and IV is cheap (`iv_percentile <= max_iv_percentile`):
/// moves tend to accelerate and premium is inexpensive, so a long
/// straddle/strangle is rebalanced by the delta hedger for scalp P&L.
pub struct GammaScalperAgent {
    pub max_iv_percentile: f64,
    pub min_confidence: f64,
    pub dte_window: (i64, i64),
    pub contracts: u32,
}

impl Default for GammaScalperAgent {
    fn default() -> Self {
        Self {
            max_iv_percentile: 0.30,
            min_confidence: 0.5,
            dte_window: (7, 21),
            contracts: 1,
        }
    }
}

impl Agent for GammaScalperAgent {
    fn id(&self) -> &'static str {
        "gamma_scalper"
    }

    fn evaluate(
        &self,
        bar: &engine_core::Bar,
        regime: &RegimeSignal,
    ) -> Option<TradeIntent> {
        if regime.regime != Regime::Expansion || regime.confidence < self.min_confidence {
            return None;
        }
        if regime.gex_regime != GexRegime::Negative {
            return None;
        }
        let iv_pct = regime.iv_percentile?;
        if iv_pct > self.max_iv_percentile {
            return None;
        }
        Some(TradeIntent {
            symbol: bar.symbol.clone(),
            agent_id: self.id().to_string(),
            direction: Direction::Sideways,
            magnitude: regime.gex_strength.min(1.0),
            confidence: regime.confidence,
            reason: format!(
                "expansion regime, negative gex, iv_percentile={iv_pct:.2}, buying gamma"
            ),
            instrument_kind: InstrumentKind::OptionPackage,
            option_meta: Some(OptionMeta {
                package_kind: PackageKind::Strangle,
                side: Side::Long,
                strike_policy: StrikePolicy::TargetDelta(0.3),
                dte_window: self.dte_window,
                contracts: self.contracts,
            }),
        })
    }
}
