use engine_core::{Direction, InstrumentKind, Regime, RegimeSignal, TradeIntent};

use crate::{feature, Agent};

/// Fades extension within `Regime::MeanReversion` on an extreme VWAP
/// deviation or RSI reading (feature engine keys `vwap_dev`, `rsi`).
pub struct MeanReversionAgent {
    pub min_confidence: f64,
    pub vwap_dev_threshold: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for MeanReversionAgent {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            vwap_dev_threshold: 0.015,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

impl Agent for MeanReversionAgent {
    fn id(&self) -> &'static str {
        "mean_reversion"
    }

    fn evaluate(
        &self,
        bar: &engine_core::Bar,
        regime: &RegimeSignal,
    ) -> Option<TradeIntent> {
        if regime.regime != Regime::MeanReversion || regime.confidence < self.min_confidence {
            return None;
        }

        let vwap_dev = feature(regime, "vwap_dev");
        let rsi = feature(regime, "rsi");

        let (direction, magnitude, reason) = if let Some(dev) = vwap_dev.filter(|d| d.abs() >= self.vwap_dev_threshold) {
            let dir = if dev > 0.0 { Direction::Down } else { Direction::Up };
            let mag = (dev.abs() / (self.vwap_dev_threshold * 3.0)).clamp(0.0, 1.0);
            (dir, mag, format!("mean reversion, vwap_dev={dev:.4}"))
        } else if let Some(r) = rsi.filter(|r| *r >= self.rsi_overbought || *r <= self.rsi_oversold) {
            let dir = if r >= self.rsi_overbought { Direction::Down } else { Direction::Up };
            let mag = if r >= self.rsi_overbought {
                ((r - self.rsi_overbought) / 30.0).clamp(0.0, 1.0)
            } else {
                ((self.rsi_oversold - r) / 30.0).clamp(0.0, 1.0)
            };
            (dir, mag, format!("mean reversion, rsi={r:.1}"))
        } else {
            return None;
        };

        Some(TradeIntent {
            symbol: bar.symbol.clone(),
            agent_id: self.id().to_string(),
            direction,
            magnitude: (magnitude * regime.confidence).clamp(0.0, 1.0),
            confidence: regime.confidence,
            reason,
            instrument_kind: InstrumentKind::Stock,
            option_meta: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_core::{Bar, Bias, GexRegime, VolatilityBucket};
    use std::collections::HashMap;

    fn bar() -> Bar {
        Bar {
            symbol: "QQQ".into(),
            timestamp: Utc::now(),
            open: 370.0,
            high: 372.0,
            low: 368.0,
            close: 371.0,
            volume: 500_000.0,
        }
    }

    fn regime(features: HashMap<String, f64>) -> RegimeSignal {
        RegimeSignal {
            symbol: "QQQ".into(),
            timestamp: Utc::now(),
            regime: Regime::MeanReversion,
            direction: Direction::Sideways,
            volatility: VolatilityBucket::Medium,
            bias: Bias::Neutral,
            confidence: 0.6,
            gex_regime: GexRegime::Unknown,
            gex_strength: 0.0,
            iv_percentile: None,
            features,
        }
    }

    #[test]
    fn fades_overbought_vwap_deviation() {
        let agent = MeanReversionAgent::default();
        let mut features = HashMap::new();
        features.insert("vwap_dev".to_string(), 0.03);
        let intent = agent.evaluate(&bar(), &regime(features)).unwrap();
        assert_eq!(intent.direction, Direction::Down);
    }

    #[test]
    fn fades_oversold_rsi_when_vwap_flat() {
        let agent = MeanReversionAgent::default();
        let mut features = HashMap::new();
        features.insert("vwap_dev".to_string(), 0.001);
        features.insert("rsi".to_string(), 22.0);
        let intent = agent.evaluate(&bar(), &regime(features)).unwrap();
        assert_eq!(intent.direction, Direction::Up);
    }

    #[test]
    fn ignores_mild_readings() {
        let agent = MeanReversionAgent::default();
        let mut features = HashMap::new();
        features.insert("vwap_dev".to_string(), 0.002);
        features.insert("rsi".to_string(), 50.0);
        assert!(agent.evaluate(&bar(), &regime(features)).is_none());
    }
}
