use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use engine_core::{Order, OrderResult, OrderSide, OrderStatus, Position};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::BrokerClient;

/// Deterministic paper-trading engine for replay mode (spec.md §4.9). Fills
/// stock orders at the mark price handed in by the caller (`bar.close` for
/// stock legs, the contract's current quote for option legs) with optional
/// slippage drawn from a seeded RNG, so two runs with the same seed produce
/// byte-identical fills. Idempotent per `client_order_id`.
pub struct PaperBroker {
    rng: Mutex<ChaCha8Rng>,
    positions: Mutex<HashMap<String, Position>>,
    seen_orders: Mutex<HashMap<String, OrderResult>>,
    equity: Mutex<f64>,
    slippage_bps: f64,
}

impl PaperBroker {
    pub fn new(seed: u64, starting_equity: f64, slippage_bps: f64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            positions: Mutex::new(HashMap::new()),
            seen_orders: Mutex::new(HashMap::new()),
            equity: Mutex::new(starting_equity),
            slippage_bps,
        }
    }

    fn slipped_price(&self, mark_price: f64, side: OrderSide) -> f64 {
        if self.slippage_bps <= 0.0 {
            return mark_price;
        }
        let mut rng = self.rng.lock().expect("paper broker rng poisoned");
        let jitter_bps: f64 = rng.gen_range(0.0..self.slippage_bps);
        let adverse = match side {
            OrderSide::Buy => 1.0 + jitter_bps / 10_000.0,
            OrderSide::Sell => 1.0 - jitter_bps / 10_000.0,
        };
        mark_price * adverse
    }

    /// Stock-only: `positions()` tracks net shares per underlying, used by
    /// the risk gate and delta hedger. Option leg fills carry their own P&L
    /// in the `Leg` the options package manager keeps, so they never touch
    /// this ledger — folding a call and a put fill into the same underlying
    /// symbol's share count would be meaningless.
    fn apply_fill(&self, order: &Order, fill_price: f64) {
        if order.contract_symbol.is_some() {
            return;
        }
        let mut positions = self.positions.lock().expect("paper broker positions poisoned");
        let signed_qty = match order.side {
            OrderSide::Buy => order.quantity as i64,
            OrderSide::Sell => -(order.quantity as i64),
        };
        let position = positions
            .entry(order.symbol.clone())
            .or_insert_with(|| Position::flat(order.symbol.clone()));

        let prev_qty = position.quantity;
        let new_qty = prev_qty + signed_qty;

        if prev_qty == 0 || prev_qty.signum() == signed_qty.signum() {
            // Opening or adding to a position: blend the average entry price.
            let prev_notional = position.avg_entry_price.to_string().parse::<f64>().unwrap_or(0.0)
                * prev_qty.unsigned_abs() as f64;
            let add_notional = fill_price * signed_qty.unsigned_abs() as f64;
            let total_abs = new_qty.unsigned_abs() as f64;
            if total_abs > 0.0 {
                let blended = (prev_notional + add_notional) / total_abs;
                position.avg_entry_price = rust_decimal::Decimal::try_from(blended).unwrap_or_default();
            }
        } else {
            // Reducing or flipping: realize P&L on the closed portion.
            let closed_qty = prev_qty.unsigned_abs().min(signed_qty.unsigned_abs()) as f64;
            let entry_price = position.avg_entry_price.to_string().parse::<f64>().unwrap_or(0.0);
            let pnl = (fill_price - entry_price) * closed_qty * prev_qty.signum() as f64;
            let realized = position.realized_pnl.to_string().parse::<f64>().unwrap_or(0.0);
            position.realized_pnl = rust_decimal::Decimal::try_from(realized + pnl).unwrap_or_default();
        }
        position.quantity = new_qty;
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn submit(&self, order: &Order, mark_price: f64) -> Result<OrderResult> {
        if let Some(cached) = self
            .seen_orders
            .lock()
            .expect("paper broker seen_orders poisoned")
            .get(&order.client_order_id)
        {
            return Ok(cached.clone());
        }

        let fill_price = self.slipped_price(mark_price, order.side);
        self.apply_fill(order, fill_price);

        let result = OrderResult {
            order_id: uuid::Uuid::new_v4().to_string(),
            client_order_id: order.client_order_id.clone(),
            status: OrderStatus::Filled,
            fill_qty: order.quantity,
            fill_price,
            timestamp: chrono::Utc::now(),
        };

        self.seen_orders
            .lock()
            .expect("paper broker seen_orders poisoned")
            .insert(order.client_order_id.clone(), result.clone());

        Ok(result)
    }

    async fn cancel(&self, _order_id: &str) -> Result<()> {
        // Paper fills are synchronous, so there is never anything in flight to cancel.
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .expect("paper broker positions poisoned")
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect())
    }

    async fn account_equity(&self) -> Result<f64> {
        Ok(*self.equity.lock().expect("paper broker equity poisoned"))
    }
}
