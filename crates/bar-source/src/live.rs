use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{Bar, EngineError, EngineResult};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{BarEvent, BarSource};

const BASE_URL: &str = "https://api.polygon.io";

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: StdDuration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: StdDuration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests,
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }
            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }
            let wait_until = ts.front().unwrap().checked_add(self.window).unwrap();
            let sleep_dur = wait_until.duration_since(now) + StdDuration::from_millis(50);
            drop(ts);
            tracing::debug!(seconds = sleep_dur.as_secs_f64(), "rate limiter waiting for Polygon slot");
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Live bar source backed by Polygon's aggregates endpoint. `subscribe`
/// preloads `preload_n` minute bars per symbol so the feature engine can
/// warm up before the first `next_bar` poll; after that, `next_bar` polls
/// for bars newer than the last one delivered and returns `None` on timeout
/// rather than treating "nothing new yet" as an error.
pub struct PolygonBarSource {
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
    queues: HashMap<String, VecDeque<Bar>>,
    last_seen: HashMap<String, DateTime<Utc>>,
    connected: bool,
}

impl PolygonBarSource {
    pub fn new(api_key: String, max_requests_per_min: usize) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_key,
            client,
            rate_limiter: RateLimiter::new(max_requests_per_min, StdDuration::from_secs(60)),
            queues: HashMap::new(),
            last_seen: HashMap::new(),
            connected: false,
        }
    }

    async fn fetch_aggregates(&self, symbol: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> EngineResult<Vec<Bar>> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/minute/{}/{}",
            BASE_URL,
            symbol,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        self.rate_limiter.acquire().await;
        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str()), ("adjusted", "true"), ("sort", "asc")])
            .send()
            .await
            .map_err(|e| EngineError::FeedUnavailable(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Err(EngineError::SymbolUnknown(symbol.to_string()));
        }
        if !response.status().is_success() {
            return Err(EngineError::FeedUnavailable(format!("HTTP {}", response.status())));
        }

        let body: AggregateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::FeedUnavailable(e.to_string()))?;

        Ok(body
            .results
            .into_iter()
            .filter_map(|r| {
                DateTime::from_timestamp_millis(r.t).map(|timestamp| Bar {
                    symbol: symbol.to_string(),
                    timestamp,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect())
    }
}

#[async_trait]
impl BarSource for PolygonBarSource {
    async fn connect(&mut self) -> EngineResult<()> {
        if self.api_key.is_empty() {
            return Err(EngineError::FeedUnavailable("missing Polygon API key".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String], preload_n: usize) -> EngineResult<()> {
        if !self.connected {
            return Err(EngineError::FeedUnavailable("subscribe called before connect".into()));
        }
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(preload_n.max(1) as i64 * 2);

        for symbol in symbols {
            let bars = self.fetch_aggregates(symbol, from, to).await?;
            let tail: VecDeque<Bar> = bars.into_iter().rev().take(preload_n).rev().collect();
            if let Some(last) = tail.back() {
                self.last_seen.insert(symbol.clone(), last.timestamp);
            }
            self.queues.insert(symbol.clone(), tail);
        }
        Ok(())
    }

    async fn next_bar(&mut self, symbol: &str, timeout: StdDuration) -> EngineResult<BarEvent> {
        if let Some(queue) = self.queues.get_mut(symbol) {
            if let Some(bar) = queue.pop_front() {
                return Ok(BarEvent::Bar(bar));
            }
        }

        let deadline = Instant::now() + timeout;
        let poll_interval = StdDuration::from_millis(500).min(timeout.max(StdDuration::from_millis(1)));

        loop {
            let from = self
                .last_seen
                .get(symbol)
                .copied()
                .unwrap_or_else(|| Utc::now() - chrono::Duration::minutes(2));
            let to = Utc::now();

            let fresh = self.fetch_aggregates(symbol, from, to).await?;
            let new_bars: Vec<Bar> = fresh.into_iter().filter(|b| b.timestamp > from).collect();

            if !new_bars.is_empty() {
                if let Some(last) = new_bars.last() {
                    self.last_seen.insert(symbol.to_string(), last.timestamp);
                }
                let mut iter = new_bars.into_iter();
                let first = iter.next().expect("checked non-empty above");
                self.queues.entry(symbol.to_string()).or_default().extend(iter);
                return Ok(BarEvent::Bar(first));
            }

            if Instant::now() >= deadline {
                return Ok(BarEvent::None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn next_batch(&mut self, symbol: &str, k: usize) -> EngineResult<Vec<Bar>> {
        let mut out = Vec::with_capacity(k);
        for _ in 0..k {
            match self.next_bar(symbol, StdDuration::from_secs(0)).await? {
                BarEvent::Bar(bar) => out.push(bar),
                BarEvent::None | BarEvent::EndOfStream => break,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_api_key_fails() {
        let mut source = PolygonBarSource::new(String::new(), 500);
        assert!(matches!(source.connect().await, Err(EngineError::FeedUnavailable(_))));
    }

    #[tokio::test]
    async fn subscribe_before_connect_fails() {
        let mut source = PolygonBarSource::new("key".into(), 500);
        let result = source.subscribe(&["SPY".to_string()], 10).await;
        assert!(matches!(result, Err(EngineError::FeedUnavailable(_))));
    }
}
