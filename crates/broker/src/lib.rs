mod paper;

pub use paper::PaperBroker;

use anyhow::Result;
use async_trait::async_trait;
use engine_core::{Order, OrderResult, Position};

/// Broker contract (spec.md §4.9). Implementations are expected to be
/// idempotent per `Order::client_order_id`.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn submit(&self, order: &Order, mark_price: f64) -> Result<OrderResult>;
    async fn cancel(&self, order_id: &str) -> Result<()>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn account_equity(&self) -> Result<f64>;
}
