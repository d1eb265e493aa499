//! Concrete strategy agents. Each agent is a pure function of the latest bar
//! and regime signal to an optional [`TradeIntent`] — no shared mutable
//! state, no I/O, so the meta-policy can run them in any order and re-run
//! them deterministically during replay.

mod directional;
mod gamma_scalper;
mod mean_reversion;
mod theta_harvester;
mod volatility;

pub use directional::DirectionalAgent;
pub use gamma_scalper::GammaScalperAgent;
pub use mean_reversion::MeanReversionAgent;
pub use theta_harvester::ThetaHarvesterAgent;
pub use volatility::VolatilityAgent;

use engine_core::{Bar, RegimeSignal, TradeIntent};

/// A strategy agent. `id()` must be stable across runs — it is persisted in
/// `FinalIntent::contributors` and in package/position audit trails.
pub trait Agent {
    fn id(&self) -> &'static str;

    /// Evaluate the latest bar and regime signal, returning `None` when the
    /// agent has nothing to propose this bar.
    fn evaluate(&self, bar: &Bar, regime: &RegimeSignal) -> Option<TradeIntent>;
}

/// Helper so an agent doesn't have to repeat its own id in every `TradeIntent`.
pub(crate) fn feature(regime: &RegimeSignal, key: &str) -> Option<f64> {
    regime.features.get(key).copied()
}
