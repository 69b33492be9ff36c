// ─────────────────────────────────────────────────────────────────────────────
// state.rs — Shared grid state: rungs, resting orders, net position.
//
// A single GridState lives behind one tokio::sync::Mutex (see supervisor.rs).
// Every mutation goes through a method here so invariants (ladder size, net
// position bookkeeping) stay local to one module.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    pub fn opposite(self) -> Self {
        match self {
            OrderDirection::Buy => OrderDirection::Sell,
            OrderDirection::Sell => OrderDirection::Buy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// One resting order on a rung of the ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestingOrder {
    pub order_id: String,
    pub direction: OrderDirection,
    pub price: f64,
    pub amount: f64,
    pub rung: u32,
    pub status: OrderStatus,
}

/// Latest top-of-book snapshot from the Price Watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookTop {
    pub bid: f64,
    pub ask: f64,
}

impl BookTop {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }
}

/// Full mutable state of one grid instance.
#[derive(Debug, Clone, Default)]
pub struct GridState {
    pub book: BookTop,
    /// Open orders keyed by exchange order id.
    pub orders: HashMap<String, RestingOrder>,
    /// Count of fully-filled primary-side orders (buys in a long bias,
    /// sells in a short bias).
    pub total_primary_filled: u64,
    /// Count of fully-filled counter-side orders.
    pub total_counter_filled: u64,
    /// Accumulated `notional * spread` per matched round trip.
    pub match_profit: f64,
    /// Cumulative filled notional, for `approx_fee`.
    pub cumulative_filled_notional: f64,
    /// Has the ladder been seeded at least once.
    pub seeded: bool,
    pub fills_processed: u64,
}

impl GridState {
    pub fn open_orders_on(&self, direction: OrderDirection) -> Vec<&RestingOrder> {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Open && o.direction == direction)
            .collect()
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.values().filter(|o| o.status == OrderStatus::Open).count()
    }

    /// `total_primary_filled - total_counter_filled`, the upper bound on how
    /// many counter-side orders may rest at once (invariant I1).
    pub fn net(&self) -> i64 {
        self.total_primary_filled as i64 - self.total_counter_filled as i64
    }

    /// The open order on `direction` closest to the current mid (i.e. the
    /// one that would be replenished/cascaded from first).
    pub fn nearest_open(&self, direction: OrderDirection) -> Option<&RestingOrder> {
        let orders = self.open_orders_on(direction);
        match direction {
            OrderDirection::Buy => orders.into_iter().max_by(|a, b| a.price.partial_cmp(&b.price).unwrap()),
            OrderDirection::Sell => orders.into_iter().min_by(|a, b| a.price.partial_cmp(&b.price).unwrap()),
        }
    }

    /// The open order on `direction` farthest from the current mid.
    pub fn farthest_open(&self, direction: OrderDirection) -> Option<&RestingOrder> {
        let orders = self.open_orders_on(direction);
        match direction {
            OrderDirection::Buy => orders.into_iter().min_by(|a, b| a.price.partial_cmp(&b.price).unwrap()),
            OrderDirection::Sell => orders.into_iter().max_by(|a, b| a.price.partial_cmp(&b.price).unwrap()),
        }
    }

    /// Applies a fill: marks the order filled and increments the matching
    /// primary/counter counter. Returns the filled order's direction, rung,
    /// price and amount, for the Fill Handler to act on.
    pub fn apply_fill(
        &mut self,
        config: &GridConfig,
        order_id: &str,
        filled_amount: f64,
    ) -> Option<(OrderDirection, u32, f64, f64)> {
        let order = self.orders.get_mut(order_id)?;
        order.status = OrderStatus::Filled;
        let direction = order.direction;
        let rung = order.rung;
        let price = order.price;
        if direction == primary_direction(config) {
            self.total_primary_filled += 1;
        } else {
            self.total_counter_filled += 1;
        }
        self.cumulative_filled_notional += filled_amount * price;
        self.fills_processed += 1;
        Some((direction, rung, price, filled_amount))
    }

    pub fn remove_filled_and_cancelled(&mut self) {
        self.orders.retain(|_, o| o.status == OrderStatus::Open);
    }

    /// A rough running fee estimate for logging only, never used in sizing
    /// decisions (fee rate here is a fixed 2bp estimate).
    pub fn approx_fee(&self) -> f64 {
        self.cumulative_filled_notional * 0.0002
    }
}

/// A single target rung on the ladder, before an order exists for it.
#[derive(Debug, Clone, Copy)]
pub struct PlannedRung {
    pub rung: u32,
    pub direction: OrderDirection,
    pub price: f64,
    pub amount: f64,
}

/// Buys in a long bias, sells in a short bias: the side seeded first and
/// capped only by `num_orders`, never by net position.
pub fn primary_direction(config: &GridConfig) -> OrderDirection {
    config.side_bias.primary_order_side()
}

pub fn counter_direction(config: &GridConfig) -> OrderDirection {
    config.side_bias.counter_order_side()
}

fn rung_amount(config: &GridConfig, price: f64) -> f64 {
    config.round_amount(config.notional / price / config.contract_size)
}

/// Plans the initial primary-side-only ladder around `mid`: rung `i`'s price
/// is `mid * (1 - sign * spread)^i` for `i` in `0..num_orders`, so rung 0
/// sits at `mid` itself and subsequent rungs cascade away from it.
pub fn plan_seed_ladder(config: &GridConfig, mid: f64) -> Vec<PlannedRung> {
    let sign = config.side_bias.sign();
    let direction = primary_direction(config);
    let mut plan = Vec::with_capacity(config.num_orders as usize);
    for rung in 0..config.num_orders {
        let price = config.round_price(mid * (1.0 - sign * config.spread).powi(rung as i32));
        plan.push(PlannedRung {
            rung,
            direction,
            price,
            amount: rung_amount(config, price),
        });
    }
    plan
}

/// Price of a primary-side rung cascading `rung_index + 1` steps away from
/// `reference`: `reference * (1 - sign * spread)^(rung_index + 1)`.
pub fn primary_rung_price(config: &GridConfig, reference: f64, rung_index: u32) -> f64 {
    let sign = config.side_bias.sign();
    config.round_price(reference * (1.0 - sign * config.spread).powi(rung_index as i32 + 1))
}

/// Price of a counter-side rung cascading `rung_index + 1` steps away from
/// `reference`: `reference * (1 + sign * spread)^(rung_index + 1)`.
pub fn counter_rung_price(config: &GridConfig, reference: f64, rung_index: u32) -> f64 {
    let sign = config.side_bias.sign();
    config.round_price(reference * (1.0 + sign * config.spread).powi(rung_index as i32 + 1))
}

pub fn primary_rung_amount(config: &GridConfig, price: f64) -> f64 {
    rung_amount(config, price)
}

/// Counter-side size carries a `(1 - spread)` factor so notional balances
/// the already-filled primary it is replacing.
pub fn counter_rung_amount(config: &GridConfig, price: f64) -> f64 {
    config.round_amount(rung_amount(config, price) * (1.0 - config.spread))
}
