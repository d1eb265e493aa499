use std::collections::{HashMap, VecDeque};

use engine_core::{safe_div, Bar};

use crate::indicators::{adx, atr, ema, fair_value_gap, hurst_exponent, realized_volatility, rsi, sma, vwap_deviation};

pub const MIN_BARS_FOR_FEATURES: usize = 30;
pub const REGRESSION_WINDOW: usize = 30;
pub const MIN_OBS_FOR_HURST: usize = 50;
const RING_CAPACITY: usize = 300;

/// Typed feature snapshot. `ready=false` means "not enough history" or "a
/// guarded division failed" — callers must treat it as no-decision, never
/// fall back to a stale value.
#[derive(Debug, Clone, Default)]
pub struct FeatureSnapshot {
    pub ready: bool,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub sma: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub adx: Option<f64>,
    pub vwap_dev: Option<f64>,
    pub regression_slope: Option<f64>,
    pub regression_r2: Option<f64>,
    pub hurst: Option<f64>,
    pub realized_vol: Option<f64>,
    pub fvg_bullish: Option<bool>,
    pub bars_seen: usize,
}

impl FeatureSnapshot {
    fn not_ready(bars_seen: usize) -> Self {
        Self { ready: false, bars_seen, ..Default::default() }
    }

    /// Additive, versioned key→float view handed to the regime classifier and
    /// agents (`engine_core::RegimeSignal::features`). Unknown keys are safe
    /// to ignore by older consumers.
    pub fn as_map(&self) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        let mut put = |k: &str, v: Option<f64>| {
            if let Some(v) = v {
                m.insert(k.to_string(), v);
            }
        };
        put("ema_short", self.ema_short);
        put("ema_long", self.ema_long);
        put("sma", self.sma);
        put("rsi", self.rsi);
        put("atr", self.atr);
        put("atr_pct", self.atr_pct);
        put("adx", self.adx);
        put("vwap_dev", self.vwap_dev);
        put("slope_r2", self.regression_r2);
        put("slope", self.regression_slope);
        put("hurst", self.hurst);
        put("realized_vol", self.realized_vol);
        m
    }
}

/// Retains a bounded ring of recent bars per symbol and derives a
/// [`FeatureSnapshot`] on each new bar. Bars are discarded once consumed, per
/// the spec's bar lifecycle — only the ring of closes/highs/lows survives.
pub struct FeatureEngine {
    window: VecDeque<Bar>,
    min_bars: usize,
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self { window: VecDeque::with_capacity(RING_CAPACITY), min_bars: MIN_BARS_FOR_FEATURES }
    }

    pub fn with_min_bars(min_bars: usize) -> Self {
        Self { window: VecDeque::with_capacity(RING_CAPACITY), min_bars }
    }

    pub fn bars_seen(&self) -> usize {
        self.window.len()
    }

    /// Push a new bar and recompute the snapshot. `bar.symbol` is assumed to
    /// already be validated by the caller (the scheduler drops mismatches
    /// before they reach here).
    pub fn update(&mut self, bar: Bar) -> FeatureSnapshot {
        if self.window.len() == RING_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(bar);

        if self.window.len() < self.min_bars {
            return FeatureSnapshot::not_ready(self.window.len());
        }

        let bars: Vec<Bar> = self.window.iter().cloned().collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last_close = *closes.last().unwrap();

        let ema_short = ema(&closes, 12).last().copied();
        let ema_long = ema(&closes, 26).last().copied();
        let sma_val = sma(&closes, 20).last().copied();
        let rsi_val = rsi(&closes, 14).last().copied();
        let atr_val = atr(&bars, 14).last().copied();
        let atr_pct = atr_val.and_then(|a| safe_div(a, last_close, 1e-9));
        let adx_val = adx(&bars, 14).adx.last().copied();
        let vwap_dev = vwap_deviation(&bars);

        let reg_window = &closes[closes.len().saturating_sub(REGRESSION_WINDOW)..];
        let (slope, r2) = engine_core::linreg_slope_r2(reg_window)
            .map(|(s, r)| (Some(s), Some(r)))
            .unwrap_or((None, None));

        let hurst = hurst_exponent(&closes, MIN_OBS_FOR_HURST);
        let realized_vol = realized_volatility(&closes, 20, 252.0);
        let fvg = fair_value_gap(&bars).map(|g| g.bullish);

        FeatureSnapshot {
            ready: true,
            ema_short,
            ema_long,
            sma: sma_val,
            rsi: rsi_val,
            atr: atr_val,
            atr_pct,
            adx: adx_val,
            vwap_dev,
            regression_slope: slope,
            regression_r2: r2,
            hurst,
            realized_vol,
            fvg_bullish: fvg,
            bars_seen: self.window.len(),
        }
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new()
    }
}
