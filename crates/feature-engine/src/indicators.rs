use engine_core::Bar;

/// Return `val` if it is finite, otherwise `default`.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average, seeded by an SMA over the first `period` points.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let sma_seed = finite_or(data[..period].iter().sum::<f64>() / period as f64, 0.0);
    let mut result = Vec::with_capacity(data.len());
    for _ in 0..period {
        result.push(sma_seed);
    }
    for i in period..data.len() {
        let prev_ema = result[i - 1];
        let ema_val = (data[i] - prev_ema) * multiplier + prev_ema;
        result.push(finite_or(ema_val, prev_ema));
    }
    result
}

/// Relative Strength Index (Wilder smoothing).
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }
    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(data.len() - period);
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        let rs = if avg_loss == 0.0 { 100.0 } else { avg_gain / avg_loss };
        out.push(finite_or(100.0 - (100.0 / (1.0 + rs)), 50.0));
    }
    out
}

/// Average True Range (Wilder smoothing).
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }
    let mut true_ranges = Vec::new();
    for i in 1..bars.len() {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }

    let mut out = Vec::new();
    let mut atr = finite_or(true_ranges[..period].iter().sum::<f64>() / period as f64, 0.0);
    out.push(atr);
    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        out.push(finite_or(atr, 0.0));
    }
    out
}

/// Average Directional Index — trend strength in [0, 100].
pub struct AdxResult {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxResult {
    if period == 0 || bars.len() < period * 2 + 1 {
        return AdxResult { adx: vec![], plus_di: vec![], minus_di: vec![] };
    }

    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    let mut true_range = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        true_range.push(hl.max(hc).max(lc));
    }

    let mut smoothed_plus_dm = plus_dm[..period].iter().sum::<f64>();
    let mut smoothed_minus_dm = minus_dm[..period].iter().sum::<f64>();
    let mut smoothed_tr = true_range[..period].iter().sum::<f64>();

    let mut plus_di_values = Vec::new();
    let mut minus_di_values = Vec::new();
    let mut dx_values = Vec::new();

    for i in period..plus_dm.len() {
        smoothed_plus_dm = smoothed_plus_dm - smoothed_plus_dm / period as f64 + plus_dm[i];
        smoothed_minus_dm = smoothed_minus_dm - smoothed_minus_dm / period as f64 + minus_dm[i];
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_range[i];

        let pdi = if smoothed_tr > 0.0 { 100.0 * smoothed_plus_dm / smoothed_tr } else { 0.0 };
        let mdi = if smoothed_tr > 0.0 { 100.0 * smoothed_minus_dm / smoothed_tr } else { 0.0 };
        plus_di_values.push(pdi);
        minus_di_values.push(mdi);

        let di_sum = pdi + mdi;
        dx_values.push(if di_sum > 0.0 { 100.0 * (pdi - mdi).abs() / di_sum } else { 0.0 });
    }

    if dx_values.len() < period {
        return AdxResult { adx: vec![], plus_di: plus_di_values, minus_di: minus_di_values };
    }

    let mut adx_values = Vec::new();
    let mut adx_val = finite_or(dx_values[..period].iter().sum::<f64>() / period as f64, 0.0);
    adx_values.push(adx_val);
    for dx in &dx_values[period..] {
        adx_val = (adx_val * (period - 1) as f64 + dx) / period as f64;
        adx_values.push(finite_or(adx_val, 0.0));
    }

    AdxResult { adx: adx_values, plus_di: plus_di_values, minus_di: minus_di_values }
}

/// Cumulative Volume-Weighted Average Price (reset by the caller at session boundaries).
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    if bars.is_empty() {
        return vec![];
    }
    let mut out = Vec::with_capacity(bars.len());
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;
    for bar in bars {
        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        cumulative_tpv += typical_price * bar.volume;
        cumulative_volume += bar.volume;
        let v = if cumulative_volume > 0.0 { cumulative_tpv / cumulative_volume } else { typical_price };
        out.push(finite_or(v, typical_price));
    }
    out
}

/// Last close's deviation from its own VWAP, as a fraction of VWAP.
pub fn vwap_deviation(bars: &[Bar]) -> Option<f64> {
    let vwaps = vwap(bars);
    let last_vwap = *vwaps.last()?;
    let last_close = bars.last()?.close;
    if last_vwap.abs() < 1e-9 {
        return None;
    }
    Some((last_close - last_vwap) / last_vwap)
}

/// Realized volatility: annualized stdev of close-to-close log returns over `window`.
pub fn realized_volatility(closes: &[f64], window: usize, bars_per_year: f64) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let recent = &closes[closes.len() - window - 1..];
    let log_returns: Vec<f64> = recent
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .filter(|r| r.is_finite())
        .collect();
    if log_returns.len() < 2 {
        return None;
    }
    let mean = log_returns.iter().sum::<f64>() / log_returns.len() as f64;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (log_returns.len() - 1) as f64;
    Some(variance.sqrt() * bars_per_year.sqrt())
}

/// Hurst exponent via rescaled-range analysis. <0.5 mean-reverting, ~0.5 random
/// walk, >0.5 trending. Requires at least `min_obs` closes (spec: 50).
pub fn hurst_exponent(closes: &[f64], min_obs: usize) -> Option<f64> {
    if closes.len() < min_obs {
        return None;
    }
    let n = closes.len();
    let chunk_sizes: Vec<usize> = [8usize, 16, 32, 64]
        .into_iter()
        .filter(|&c| c * 2 <= n)
        .collect();
    if chunk_sizes.len() < 2 {
        return None;
    }

    let mut log_n = Vec::new();
    let mut log_rs = Vec::new();

    for &chunk in &chunk_sizes {
        let n_chunks = n / chunk;
        let mut rs_values = Vec::new();
        for c in 0..n_chunks {
            let slice = &closes[c * chunk..(c + 1) * chunk];
            let returns: Vec<f64> = slice.windows(2).map(|w| w[1] - w[0]).collect();
            if returns.is_empty() {
                continue;
            }
            let mean = returns.iter().sum::<f64>() / returns.len() as f64;
            let mut cumulative = 0.0;
            let mut max_dev = f64::MIN;
            let mut min_dev = f64::MAX;
            for r in &returns {
                cumulative += r - mean;
                max_dev = max_dev.max(cumulative);
                min_dev = min_dev.min(cumulative);
            }
            let range = max_dev - min_dev;
            let variance =
                returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
            let std_dev = variance.sqrt();
            if std_dev > 1e-9 {
                rs_values.push(range / std_dev);
            }
        }
        if rs_values.is_empty() {
            continue;
        }
        let avg_rs = rs_values.iter().sum::<f64>() / rs_values.len() as f64;
        if avg_rs > 0.0 {
            log_n.push((chunk as f64).ln());
            log_rs.push(avg_rs.ln());
        }
    }

    if log_n.len() < 2 {
        return None;
    }
    // log_n isn't evenly spaced so `engine_core::linreg_slope_r2` (which assumes
    // x = 0..n) doesn't apply; fit log_rs against log_n directly.
    let n_pts = log_n.len() as f64;
    let sum_x: f64 = log_n.iter().sum();
    let sum_y: f64 = log_rs.iter().sum();
    let sum_xy: f64 = log_n.iter().zip(&log_rs).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = log_n.iter().map(|x| x * x).sum();
    let denom = n_pts * sum_x2 - sum_x * sum_x;
    if denom.abs() < 1e-12 {
        return None;
    }
    Some((n_pts * sum_xy - sum_x * sum_y) / denom)
}

/// A 3-candle fair-value gap: candle 1's high/low leaves an untouched
/// discontinuity versus candle 3 once candle 2 is skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairValueGap {
    pub bullish: bool,
    pub gap_low: f64,
    pub gap_high: f64,
}

/// Detects a fair-value gap ending at the most recent bar, if any.
pub fn fair_value_gap(bars: &[Bar]) -> Option<FairValueGap> {
    if bars.len() < 3 {
        return None;
    }
    let a = &bars[bars.len() - 3];
    let c = &bars[bars.len() - 1];

    if c.low > a.high {
        Some(FairValueGap { bullish: true, gap_low: a.high, gap_high: c.low })
    } else if c.high < a.low {
        Some(FairValueGap { bullish: false, gap_low: c.high, gap_high: a.low })
    } else {
        None
    }
}
