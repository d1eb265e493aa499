//! Shared statistics helpers used by the feature engine, regime classifier,
//! and risk gate. Kept dependency-free (no `statrs`) since these are called
//! on every bar for every symbol.

/// Mean of a data slice. Empty input returns 0.0.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation. Fewer than 2 points returns 0.0.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Percentile rank of `value` within `data`, in [0.0, 1.0]. Ties count as half.
pub fn percentile_rank(value: f64, data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.5;
    }
    let count_below = data.iter().filter(|&&x| x < value).count();
    let count_equal = data
        .iter()
        .filter(|&&x| (x - value).abs() < f64::EPSILON)
        .count();
    (count_below as f64 + 0.5 * count_equal as f64) / data.len() as f64
}

/// z-score of `value` relative to `data`. Returns 0.0 if variance is negligible.
pub fn z_score_of(value: f64, data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < f64::EPSILON {
        return 0.0;
    }
    (value - mean(data)) / sd
}

/// Guard a division: returns `None` when `denominator` is too small to trust,
/// rather than propagating NaN/Inf. Used wherever spec.md's numeric policy
/// ("fail-soft to `ready=false`, not silent NaNs") applies.
#[inline]
pub fn safe_div(numerator: f64, denominator: f64, eps: f64) -> Option<f64> {
    if denominator.abs() > eps && numerator.is_finite() && denominator.is_finite() {
        Some(numerator / denominator)
    } else {
        None
    }
}

/// Ordinary least-squares slope and R² of `y` against `x = 0..n`.
pub fn linreg_slope_r2(y: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = y.iter().enumerate().map(|(i, v)| i as f64 * v).sum();
    let sum_x2: f64 = (0..n).map(|i| (i * i) as f64).sum();

    let denom = safe_div(1.0, n_f * sum_x2 - sum_x * sum_x, 1e-12)?;
    let slope = (n_f * sum_xy - sum_x * sum_y) * denom;
    let intercept = (sum_y - slope * sum_x) / n_f;

    let mean_y = sum_y / n_f;
    let ss_tot: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();
    let ss_res: f64 = y
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let pred = intercept + slope * i as f64;
            (v - pred).powi(2)
        })
        .sum();

    let r2 = if ss_tot.abs() > 1e-12 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    Some((slope, r2))
}
