use engine_core::{Bias, Direction, InstrumentKind, Regime, RegimeSignal, TradeIntent};

use crate::{feature, Agent};

/// Rides `Regime::Trend` in the direction of the classifier's bias. Magnitude
/// scales with trend strength (`adx`, from the feature engine) and the
/// regime's own confidence.
pub struct DirectionalAgent {
    pub min_confidence: f64,
    pub min_adx: f64,
}

impl Default for DirectionalAgent {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            min_adx: 20.0,
        }
    }
}

impl Agent for DirectionalAgent {
    fn id(&self) -> &'static str {
        "directional"
    }

    fn evaluate(
        &self,
        bar: &engine_core::Bar,
        regime: &RegimeSignal,
    ) -> Option<TradeIntent> {
        if regime.regime != Regime::Trend || regime.confidence < self.min_confidence {
            return None;
        }
        let adx = feature(regime, "adx")?;
        if adx < self.min_adx {
            return None;
        }
        let direction = match regime.direction {
            Direction::Up if regime.bias != Bias::Bearish => Direction::Up,
            Direction::Down if regime.bias != Bias::Bullish => Direction::Down,
            _ => return None,
        };
        let strength = ((adx - self.min_adx) / 40.0).clamp(0.0, 1.0);
        Some(TradeIntent {
            symbol: bar.symbol.clone(),
            agent_id: self.id().to_string(),
            direction,
            magnitude: (strength * regime.confidence).clamp(0.0, 1.0),
            confidence: regime.confidence,
            reason: format!("trend regime, adx={adx:.1}, bias={:?}", regime.bias),
            instrument_kind: InstrumentKind::Stock,
            option_meta: None,
        })
    }
}
