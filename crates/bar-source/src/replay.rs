use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{Bar, EngineError, EngineResult};

use crate::{BarEvent, BarSource};

/// Cached, deterministic bar feed for backtests. Bars are supplied up front
/// (e.g. loaded from a parquet/CSV dump) and windowed to `(start_time,
/// end_time)` on subscribe, mirroring how a historical engine walks a sorted
/// timeline rather than polling a vendor.
pub struct ReplayBarSource {
    all_bars: HashMap<String, Vec<Bar>>,
    window: (DateTime<Utc>, DateTime<Utc>),
    queues: HashMap<String, VecDeque<Bar>>,
    strict: bool,
}

impl ReplayBarSource {
    /// `all_bars` need not be pre-sorted; each symbol's bars are sorted by
    /// timestamp on construction. `strict` controls whether subscribing to a
    /// symbol with no cached bars errors (`true`) or silently declines.
    pub fn new(
        mut all_bars: HashMap<String, Vec<Bar>>,
        window: (DateTime<Utc>, DateTime<Utc>),
        strict: bool,
    ) -> Self {
        for bars in all_bars.values_mut() {
            bars.sort_by_key(|b| b.timestamp);
        }
        Self {
            all_bars,
            window,
            queues: HashMap::new(),
            strict,
        }
    }

    pub fn remaining(&self, symbol: &str) -> usize {
        self.queues.get(symbol).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl BarSource for ReplayBarSource {
    async fn connect(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String], preload_n: usize) -> EngineResult<()> {
        let (start, end) = self.window;
        for symbol in symbols {
            let Some(bars) = self.all_bars.get(symbol) else {
                if self.strict {
                    return Err(EngineError::SymbolUnknown(symbol.clone()));
                }
                tracing::warn!(symbol, "no cached bars, declining subscription");
                continue;
            };

            let mut windowed: VecDeque<Bar> = bars
                .iter()
                .filter(|b| b.timestamp >= start && b.timestamp <= end)
                .filter(|b| b.matches(symbol))
                .cloned()
                .collect();

            if preload_n > 0 {
                // Preload is a warmup hint for the feature engine: the first
                // `preload_n` bars are handed out via `next_batch` up front
                // by the caller, so nothing special happens here beyond
                // making sure they're present in the queue.
                if windowed.len() < preload_n {
                    tracing::warn!(
                        symbol,
                        available = windowed.len(),
                        preload_n,
                        "fewer cached bars than requested preload"
                    );
                }
            }

            self.queues.insert(symbol.clone(), windowed);
        }
        Ok(())
    }

    async fn next_bar(&mut self, symbol: &str, _timeout: Duration) -> EngineResult<BarEvent> {
        match self.queues.get_mut(symbol) {
            Some(queue) => match queue.pop_front() {
                Some(bar) => {
                    if !bar.matches(symbol) {
                        return Err(EngineError::BadBar {
                            expected: symbol.to_string(),
                            actual: bar.symbol.clone(),
                        });
                    }
                    Ok(BarEvent::Bar(bar))
                }
                None => Ok(BarEvent::EndOfStream),
            },
            None => Err(EngineError::SymbolUnknown(symbol.to_string())),
        }
    }

    async fn next_batch(&mut self, symbol: &str, k: usize) -> EngineResult<Vec<Bar>> {
        let queue = self
            .queues
            .get_mut(symbol)
            .ok_or_else(|| EngineError::SymbolUnknown(symbol.to_string()))?;
        let take = k.min(queue.len());
        Ok(queue.drain(..take).collect())
    }
}
