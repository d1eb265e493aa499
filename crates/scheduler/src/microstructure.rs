//! Seam for GEX/IV-percentile attachment (spec.md §4.3: "Microstructure
//! fields are attached by the Scheduler, not computed [by the classifier]").
//! A concrete vendor-backed implementation (options-chain GEX calculation,
//! rolling IV-percentile history) is out of scope here — vendor market-data
//! clients are a spec.md §1 non-goal — so this crate ships only the trait
//! and a null implementation that leaves packages/regimes GEX-unaware.

use engine_core::GexRegime;

pub trait MicrostructureProvider: Send + Sync {
    fn gex(&self, symbol: &str, spot: f64) -> (GexRegime, f64);
    fn iv_percentile(&self, symbol: &str) -> Option<f64>;
}

pub struct NullMicrostructureProvider;

impl MicrostructureProvider for NullMicrostructureProvider {
    fn gex(&self, _symbol: &str, _spot: f64) -> (GexRegime, f64) {
        (GexRegime::Unknown, 0.0)
    }

    fn iv_percentile(&self, _symbol: &str) -> Option<f64> {
        None
    }
}
