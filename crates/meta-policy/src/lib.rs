//! Arbitrates the concrete agents' [`TradeIntent`]s into one [`FinalIntent`]
//! per symbol per bar (spec.md §4.5): filter incompatible/low-confidence
//! intents, score the survivors, then either blend the top two or pick a
//! single winner.

use std::collections::{HashMap, HashSet};

use engine_core::{Bias, Direction, FinalIntent, InstrumentKind, Regime, RegimeSignal, TradeIntent, VolatilityBucket};

/// Fraction the runner-up's score may trail the leader's by and still blend.
const BLEND_TOLERANCE: f64 = 0.05;

pub struct MetaPolicy {
    pub agent_weights: HashMap<String, f64>,
    pub regime_weights: HashMap<String, HashMap<Regime, f64>>,
    pub vol_weights: HashMap<VolatilityBucket, f64>,
    pub min_confidence: f64,
    /// Confidence an intent opposing the regime's hard bias must clear to
    /// survive the filter step, instead of being dropped outright.
    pub bias_override_confidence: f64,
    /// Symbols the options chain is wired up for. `None` means every symbol
    /// is optionable (the permissive default); `Some(set)` drops any
    /// `OptionPackage`/`OptionSingle` intent for a symbol outside it.
    pub optionable_symbols: Option<HashSet<String>>,
}

impl Default for MetaPolicy {
    fn default() -> Self {
        let mut vol_weights = HashMap::new();
        vol_weights.insert(VolatilityBucket::Low, 1.0);
        vol_weights.insert(VolatilityBucket::Medium, 1.0);
        vol_weights.insert(VolatilityBucket::High, 0.7);

        Self {
            agent_weights: HashMap::new(),
            regime_weights: HashMap::new(),
            vol_weights,
            min_confidence: 0.4,
            bias_override_confidence: 0.85,
            optionable_symbols: None,
        }
    }
}

struct Scored {
    intent: TradeIntent,
    score: f64,
}

impl MetaPolicy {
    fn agent_weight(&self, agent_id: &str) -> f64 {
        self.agent_weights.get(agent_id).copied().unwrap_or(1.0)
    }

    fn regime_weight(&self, agent_id: &str, regime: Regime) -> f64 {
        self.regime_weights
            .get(agent_id)
            .and_then(|m| m.get(&regime))
            .copied()
            .unwrap_or(1.0)
    }

    fn vol_weight(&self, volatility: VolatilityBucket) -> f64 {
        self.vol_weights.get(&volatility).copied().unwrap_or(1.0)
    }

    fn passes_filter(&self, signal: &RegimeSignal, intent: &TradeIntent) -> bool {
        if intent.instrument_kind != InstrumentKind::Stock {
            if let Some(optionable) = &self.optionable_symbols {
                if !optionable.contains(&signal.symbol) {
                    return false;
                }
            }
        }
        if intent.confidence < self.min_confidence {
            return false;
        }
        if opposes_hard_bias(signal.bias, intent.direction) && intent.confidence < self.bias_override_confidence
        {
            return false;
        }
        true
    }

    pub fn decide(&self, signal: &RegimeSignal, intents: &[TradeIntent]) -> FinalIntent {
        let mut scored: Vec<Scored> = intents
            .iter()
            .filter(|i| self.passes_filter(signal, i))
            .map(|intent| {
                let score = self.agent_weight(&intent.agent_id)
                    * self.regime_weight(&intent.agent_id, signal.regime)
                    * self.vol_weight(signal.volatility)
                    * intent.confidence;
                Scored { intent: intent.clone(), score }
            })
            .collect();

        if scored.is_empty() {
            return FinalIntent::hold(signal.symbol.clone(), "no qualifying agent intents");
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| {
                    self.agent_weight(&b.intent.agent_id)
                        .partial_cmp(&self.agent_weight(&a.intent.agent_id))
                        .unwrap()
                })
                .then_with(|| a.intent.agent_id.cmp(&b.intent.agent_id))
        });

        let top = &scored[0];
        let is_multi_leg = top.intent.instrument_kind == InstrumentKind::OptionPackage;

        if !is_multi_leg && scored.len() > 1 {
            let runner_up = &scored[1];
            let within_tolerance = top.score > 0.0
                && (top.score - runner_up.score) / top.score <= BLEND_TOLERANCE;
            if within_tolerance && top.intent.direction == runner_up.intent.direction {
                return blend(signal, top, runner_up);
            }
        }

        to_final(signal, top, vec![top.intent.agent_id.clone()])
    }
}

fn opposes_hard_bias(bias: Bias, direction: Direction) -> bool {
    matches!(
        (bias, direction),
        (Bias::Bullish, Direction::Down) | (Bias::Bearish, Direction::Up)
    )
}

fn signed_magnitude(intent: &TradeIntent) -> f64 {
    match intent.direction {
        Direction::Up => intent.magnitude,
        Direction::Down => -intent.magnitude,
        Direction::Sideways => intent.magnitude,
    }
}

fn to_final(signal: &RegimeSignal, winner: &Scored, contributors: Vec<String>) -> FinalIntent {
    FinalIntent {
        symbol: signal.symbol.clone(),
        position_delta: signed_magnitude(&winner.intent),
        confidence: winner.intent.confidence,
        primary_agent: winner.intent.agent_id.clone(),
        contributors,
        reason: winner.intent.reason.clone(),
        instrument_kind: winner.intent.instrument_kind,
        option_meta: winner.intent.option_meta.clone(),
    }
}

fn blend(signal: &RegimeSignal, top: &Scored, runner_up: &Scored) -> FinalIntent {
    let total_score = top.score + runner_up.score;
    let blended_magnitude = if total_score > 0.0 {
        (top.intent.magnitude * top.score + runner_up.intent.magnitude * runner_up.score)
            / total_score
    } else {
        top.intent.magnitude
    };
    let blended_confidence = if total_score > 0.0 {
        (top.intent.confidence * top.score + runner_up.intent.confidence * runner_up.score)
            / total_score
    } else {
        top.intent.confidence
    };
    let signed = match top.intent.direction {
        Direction::Up => blended_magnitude,
        Direction::Down => -blended_magnitude,
        Direction::Sideways => blended_magnitude,
    };
    FinalIntent {
        symbol: signal.symbol.clone(),
        position_delta: signed,
        confidence: blended_confidence,
        primary_agent: top.intent.agent_id.clone(),
        contributors: vec![top.intent.agent_id.clone(), runner_up.intent.agent_id.clone()],
        reason: format!("blend({}, {})", top.intent.agent_id, runner_up.intent.agent_id),
        instrument_kind: top.intent.instrument_kind,
        option_meta: top.intent.option_meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_core::{GexRegime, OptionMeta, PackageKind, Side, StrikePolicy};
    use std::collections::HashMap as Map;

    fn signal(bias: Bias, volatility: VolatilityBucket) -> RegimeSignal {
        RegimeSignal {
            symbol: "SPY".into(),
            timestamp: Utc::now(),
            regime: Regime::Trend,
            direction: Direction::Up,
            volatility,
            bias,
            confidence: 0.8,
            gex_regime: GexRegime::Unknown,
            gex_strength: 0.0,
            iv_percentile: None,
            features: Map::new(),
        }
    }

    fn stock_intent(agent_id: &str, direction: Direction, magnitude: f64, confidence: f64) -> TradeIntent {
        TradeIntent {
            symbol: "SPY".into(),
            agent_id: agent_id.to_string(),
            direction,
            magnitude,
            confidence,
            reason: "test".into(),
            instrument_kind: InstrumentKind::Stock,
            option_meta: None,
        }
    }

    #[test]
    fn empty_intents_yield_hold() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Neutral, VolatilityBucket::Medium);
        let result = policy.decide(&signal, &[]);
        assert!(result.is_hold());
    }

    #[test]
    fn low_confidence_intent_is_filtered_out() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Neutral, VolatilityBucket::Medium);
        let intents = vec![stock_intent("directional", Direction::Up, 0.5, 0.1)];
        let result = policy.decide(&signal, &intents);
        assert!(result.is_hold());
    }

    #[test]
    fn single_strong_intent_wins_outright() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Bullish, VolatilityBucket::Medium);
        let intents = vec![stock_intent("directional", Direction::Up, 0.6, 0.7)];
        let result = policy.decide(&signal, &intents);
        assert!(result.position_delta > 0.0);
        assert_eq!(result.primary_agent, "directional");
    }

    #[test]
    fn opposing_bias_intent_dropped_unless_very_confident() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Bullish, VolatilityBucket::Medium);
        let weak = vec![stock_intent("mean_reversion", Direction::Down, 0.5, 0.6)];
        assert!(policy.decide(&signal, &weak).is_hold());

        let strong = vec![stock_intent("mean_reversion", Direction::Down, 0.5, 0.9)];
        assert!(!policy.decide(&signal, &strong).is_hold());
    }

    #[test]
    fn near_tied_same_direction_intents_blend() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Bullish, VolatilityBucket::Medium);
        let intents = vec![
            stock_intent("directional", Direction::Up, 0.6, 0.7),
            stock_intent("volatility", Direction::Up, 0.4, 0.69),
        ];
        let result = policy.decide(&signal, &intents);
        assert_eq!(result.contributors.len(), 2);
        assert!(result.position_delta > 0.0);
    }

    #[test]
    fn option_intent_dropped_for_non_optionable_symbol() {
        let mut policy = MetaPolicy::default();
        policy.optionable_symbols = Some(["SPY".to_string()].into_iter().collect());
        let signal = signal(Bias::Neutral, VolatilityBucket::Low);
        let option_intent = TradeIntent {
            symbol: "SPY".into(),
            agent_id: "theta_harvester".into(),
            direction: Direction::Sideways,
            magnitude: 0.7,
            confidence: 0.75,
            reason: "compression".into(),
            instrument_kind: InstrumentKind::OptionPackage,
            option_meta: Some(OptionMeta {
                package_kind: PackageKind::Straddle,
                side: Side::Short,
                strike_policy: StrikePolicy::AtTheMoney,
                dte_window: (25, 45),
                contracts: 1,
            }),
        };

        // SPY is optionable, so the intent survives...
        assert!(!policy.decide(&signal, &[option_intent.clone()]).is_hold());

        // ...but a chain-less symbol's identical intent is dropped, falling back to hold.
        let mut no_chain_signal = signal.clone();
        no_chain_signal.symbol = "ILLIQUID".into();
        let mut no_chain_intent = option_intent;
        no_chain_intent.symbol = "ILLIQUID".into();
        assert!(policy.decide(&no_chain_signal, &[no_chain_intent]).is_hold());
    }

    #[test]
    fn multi_leg_option_intents_never_blend() {
        let policy = MetaPolicy::default();
        let signal = signal(Bias::Neutral, VolatilityBucket::Low);
        let option_intent = TradeIntent {
            symbol: "SPY".into(),
            agent_id: "theta_harvester".into(),
            direction: Direction::Sideways,
            magnitude: 0.7,
            confidence: 0.75,
            reason: "compression".into(),
            instrument_kind: InstrumentKind::OptionPackage,
            option_meta: Some(OptionMeta {
                package_kind: PackageKind::Straddle,
                side: Side::Short,
                strike_policy: StrikePolicy::AtTheMoney,
                dte_window: (25, 45),
                contracts: 1,
            }),
        };
        let other = stock_intent("directional", Direction::Sideways, 0.69, 0.74);
        let result = policy.decide(&signal, &[option_intent, other]);
        assert_eq!(result.contributors.len(), 1);
        assert_eq!(result.instrument_kind, InstrumentKind::OptionPackage);
    }
}
