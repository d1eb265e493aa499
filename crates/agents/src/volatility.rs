use engine_core::{InstrumentKind, Regime, RegimeSignal, TradeIntent, VolatilityBucket};

use crate::Agent;

/// Trades breakouts out of `Regime::Expansion` with `VolatilityBucket::High`,
/// continuing in the classifier's own direction (it already measured the break).
pub struct VolatilityAgent {
    pub min_confidence: f64,
}

impl Default for VolatilityAgent {
    fn default() -> Self {
        Self { min_confidence: 0.5 }
    }
}

impl Agent for VolatilityAgent {
    fn id(&self) -> &'static str {
        "volatility"
    }

    fn evaluate(
        &self,
        bar: &engine_core::Bar,
        regime: &RegimeSignal,
    ) -> Option<TradeIntent> {
        if regime.regime != Regime::Expansion || regime.volatility != VolatilityBucket::High {
            return None;
        }
        if regime.confidence < self.min_confidence {
            return None;
        }
        Some(TradeIntent {
            symbol: bar.symbol.clone(),
            agent_id: self.id().to_string(),
            direction: regime.direction,
            magnitude: regime.confidence,
            confidence: regime.confidence,
            reason: "expansion regime with high volatility".to_string(),
            instrument_kind: InstrumentKind::Stock,
            option_meta: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_core::{Bar, Bias, Direction, GexRegime};
    use std::collections::HashMap;

    fn bar() -> Bar {
        Bar {
            symbol: "TSLA".into(),
            timestamp: Utc::now(),
            open: 240.0,
            high: 250.0,
            low: 239.0,
            close: 249.0,
            volume: 2_000_000.0,
        }
    }

    fn regime(volatility: VolatilityBucket, regime_kind: Regime) -> RegimeSignal {
        RegimeSignal {
            symbol: "TSLA".into(),
            timestamp: Utc::now(),
            regime: regime_kind,
            direction: Direction::Up,
            volatility,
            bias: Bias::Bullish,
            confidence: 0.65,
            gex_regime: GexRegime::Negative,
            gex_strength: 1.2,
            iv_percentile: Some(0.7),
            features: HashMap::new(),
        }
    }

    #[test]
    fn trades_high_vol_expansion() {
        let agent = VolatilityAgent::default();
        let intent = agent
            .evaluate(&bar(), &regime(VolatilityBucket::High, Regime::Expansion))
            .unwrap();
        assert_eq!(intent.direction, Direction::Up);
    }

    #[test]
    fn ignores_low_vol_expansion() {
        let agent = VolatilityAgent::default();
        assert!(agent
            .evaluate(&bar(), &regime(VolatilityBucket::Low, Regime::Expansion))
            .is_none());
    }
}
