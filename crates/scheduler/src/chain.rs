//! Default `OptionsChainSource` when no vendor chain feed is wired in. A
//! live deployment injects a real one (Polygon/CBOE snapshot, out of scope
//! here per spec.md §1's vendor-client non-goal); this stub makes
//! `OptionsPackageManager::open` a clean no-contract no-op instead of a
//! panic when the caller hasn't supplied a chain.

use chrono::{DateTime, Utc};
use engine_core::Right;
use options_package_manager::{OptionQuote, OptionsChainSource};

pub struct NullChain;

impl OptionsChainSource for NullChain {
    fn expiries(&self, _symbol: &str, _as_of: DateTime<Utc>, _dte_window: (i64, i64)) -> Vec<DateTime<Utc>> {
        Vec::new()
    }

    fn strikes(&self, _symbol: &str, _expiry: DateTime<Utc>, _right: Right) -> Vec<f64> {
        Vec::new()
    }

    fn quote(&self, _symbol: &str, _right: Right, _strike: f64, _expiry: DateTime<Utc>) -> Option<OptionQuote> {
        None
    }
}
