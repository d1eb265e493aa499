use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

/// Per-contract Greeks, same shape the rest of the engine's `Leg` fields use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Black-Scholes Greeks for European-style equity options. Risk-free rate is
/// held fixed for the life of a package rather than refetched per bar.
pub struct BlackScholes {
    spot: f64,
    risk_free_rate: f64,
}

fn normal_cdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .expect("standard normal parameters are always valid")
        .cdf(x)
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

impl BlackScholes {
    pub fn new(spot: f64, risk_free_rate: f64) -> Self {
        Self { spot, risk_free_rate }
    }

    fn d1(&self, strike: f64, ttm_years: f64, iv: f64) -> f64 {
        ((self.spot / strike).ln() + (self.risk_free_rate + 0.5 * iv * iv) * ttm_years) / (iv * ttm_years.sqrt())
    }

    fn d2(&self, d1: f64, ttm_years: f64, iv: f64) -> f64 {
        d1 - iv * ttm_years.sqrt()
    }

    /// `dte_days` and `iv` (annualized) must both be positive; zero or
    /// negative inputs (an expired or un-quoted contract) return all-zero
    /// Greeks rather than propagating NaN.
    pub fn call(&self, strike: f64, dte_days: i64, iv: f64) -> Greeks {
        self.greeks(strike, dte_days, iv, true)
    }

    pub fn put(&self, strike: f64, dte_days: i64, iv: f64) -> Greeks {
        self.greeks(strike, dte_days, iv, false)
    }

    fn greeks(&self, strike: f64, dte_days: i64, iv: f64, is_call: bool) -> Greeks {
        let ttm_years = dte_days as f64 / 365.25;
        if ttm_years <= 0.0 || iv <= 0.0 || strike <= 0.0 || self.spot <= 0.0 {
            return Greeks::default();
        }

        let d1 = self.d1(strike, ttm_years, iv);
        let d2 = self.d2(d1, ttm_years, iv);
        let n_prime_d1 = normal_pdf(d1);
        let gamma = n_prime_d1 / (self.spot * iv * ttm_years.sqrt());
        let vega = self.spot * n_prime_d1 * ttm_years.sqrt() / 100.0;

        if is_call {
            let n_d1 = normal_cdf(d1);
            let n_d2 = normal_cdf(d2);
            let theta = (-self.spot * n_prime_d1 * iv / (2.0 * ttm_years.sqrt())
                - self.risk_free_rate * strike * (-self.risk_free_rate * ttm_years).exp() * n_d2)
                / 365.25;
            Greeks { delta: n_d1, gamma, theta, vega }
        } else {
            let n_neg_d1 = normal_cdf(-d1);
            let n_neg_d2 = normal_cdf(-d2);
            let theta = (-self.spot * n_prime_d1 * iv / (2.0 * ttm_years.sqrt())
                + self.risk_free_rate * strike * (-self.risk_free_rate * ttm_years).exp() * n_neg_d2)
                / 365.25;
            Greeks { delta: -n_neg_d1, gamma, theta, vega }
        }
    }
}
