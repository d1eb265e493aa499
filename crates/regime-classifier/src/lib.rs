//! Deterministic rule tree over [`FeatureSnapshot`]s. Kept replaceable by a
//! probabilistic model without changing `RegimeSignal`'s schema (spec.md
//! §4.3) — all state this classifier needs is the previous bar's regime per
//! symbol, used only to break ties.

use std::collections::HashMap;

use chrono::Utc;
use engine_core::{Bias, Direction, Regime, RegimeSignal, VolatilityBucket};
use feature_engine::FeatureSnapshot;

const ADX_TREND_THRESHOLD: f64 = 20.0;
const R2_TREND_THRESHOLD: f64 = 0.5;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const ATR_PCT_LOW: f64 = 0.008;
const ATR_PCT_HIGH: f64 = 0.02;
const HYSTERESIS_MARGIN: f64 = 0.05;

struct ScoredRegime {
    regime: Regime,
    score: f64,
}

pub struct RegimeClassifier {
    previous_regime: HashMap<String, Regime>,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self { previous_regime: HashMap::new() }
    }

    /// Classify one symbol's latest bar. Returns `None` when `features` is
    /// not ready (caller should skip to the next scheduler step).
    pub fn classify(
        &mut self,
        symbol: &str,
        features: &FeatureSnapshot,
    ) -> Option<RegimeSignal> {
        if !features.ready {
            return None;
        }

        let mut scores = vec![
            ScoredRegime { regime: Regime::Trend, score: 0.0 },
            ScoredRegime { regime: Regime::MeanReversion, score: 0.0 },
            ScoredRegime { regime: Regime::Compression, score: 0.0 },
            ScoredRegime { regime: Regime::Expansion, score: 0.0 },
        ];

        let adx = features.adx.unwrap_or(0.0);
        let r2 = features.regression_r2.unwrap_or(0.0);
        let atr_pct = features.atr_pct.unwrap_or(0.0);
        let rsi = features.rsi.unwrap_or(50.0);
        let vwap_dev = features.vwap_dev.unwrap_or(0.0);

        if adx >= ADX_TREND_THRESHOLD && r2 >= R2_TREND_THRESHOLD {
            scores[0].score += 0.5 * (adx / 50.0).min(1.0) + 0.5 * r2;
        }
        if rsi >= RSI_OVERBOUGHT || rsi <= RSI_OVERSOLD || vwap_dev.abs() >= 0.015 {
            let rsi_strength = ((rsi - 50.0).abs() / 50.0).min(1.0);
            let dev_strength = (vwap_dev.abs() / 0.03).min(1.0);
            scores[1].score += 0.5 * rsi_strength + 0.5 * dev_strength;
        }
        if atr_pct <= ATR_PCT_LOW {
            scores[2].score += 1.0 - (atr_pct / ATR_PCT_LOW).min(1.0);
        }
        if atr_pct >= ATR_PCT_HIGH {
            scores[3].score += ((atr_pct - ATR_PCT_HIGH) / ATR_PCT_HIGH).min(1.0);
        }

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        let prev = self.previous_regime.get(symbol).copied();
        let chosen = if let Some(prev_regime) = prev {
            if scores[0].score - scores[1].score < HYSTERESIS_MARGIN {
                scores
                    .iter()
                    .find(|s| s.regime == prev_regime)
                    .map(|s| s.regime)
                    .unwrap_or(scores[0].regime)
            } else {
                scores[0].regime
            }
        } else {
            scores[0].regime
        };
        let confidence = scores
            .iter()
            .find(|s| s.regime == chosen)
            .map(|s| s.score.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        self.previous_regime.insert(symbol.to_string(), chosen);

        let direction = match features.regression_slope {
            Some(slope) if slope > 1e-6 => Direction::Up,
            Some(slope) if slope < -1e-6 => Direction::Down,
            _ => Direction::Sideways,
        };

        let volatility = if atr_pct >= ATR_PCT_HIGH {
            VolatilityBucket::High
        } else if atr_pct <= ATR_PCT_LOW {
            VolatilityBucket::Low
        } else {
            VolatilityBucket::Medium
        };

        let bias = match direction {
            Direction::Up => Bias::Bullish,
            Direction::Down => Bias::Bearish,
            Direction::Sideways => Bias::Neutral,
        };

        Some(RegimeSignal {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            regime: chosen,
            direction,
            volatility,
            bias,
            confidence,
            // Attached by the scheduler (spec.md §4.3); left at defaults here.
            gex_regime: engine_core::GexRegime::Unknown,
            gex_strength: 0.0,
            iv_percentile: None,
            features: features.as_map(),
        })
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}
