//! Time-ordered bar delivery (spec.md §4.1): a live Polygon-backed source for
//! production and a cached replay source for backtests, behind one contract.

pub mod live;
pub mod replay;

pub use live::PolygonBarSource;
pub use replay::ReplayBarSource;

use std::time::Duration;

use async_trait::async_trait;
use engine_core::{Bar, EngineResult};

/// Outcome of a single poll for the next bar. `None` means "nothing new yet,
/// try again" (never an error for a live feed); `EndOfStream` means a
/// cached/replay source has no further bars for that symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum BarEvent {
    Bar(Bar),
    None,
    EndOfStream,
}

/// Delivers time-ordered bars per symbol, live or replay (spec.md §4.1).
/// Implementations must never synthesize a bar in strict mode: an unknown
/// symbol either errors on `subscribe` or is declined, never backfilled.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn connect(&mut self) -> EngineResult<()>;

    async fn subscribe(&mut self, symbols: &[String], preload_n: usize) -> EngineResult<()>;

    async fn next_bar(&mut self, symbol: &str, timeout: Duration) -> EngineResult<BarEvent>;

    async fn next_batch(&mut self, symbol: &str, k: usize) -> EngineResult<Vec<Bar>>;
}
