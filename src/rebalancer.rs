// ─────────────────────────────────────────────────────────────────────────────
// rebalancer.rs — Fill handling, initial seeding, and ladder maintenance.
//
// Operates on a GridState guarded by the single Mutex held in supervisor.rs:
// seed the primary side once, post an immediate counter order on every fill,
// and run a periodic three-phase pass that keeps the counter side capped by
// net position (invariant I1) and the combined open-order count at
// `num_orders` (invariant I2) without over-churning the book in one pass.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use crate::config::GridConfig;
use crate::error::GatewayError;
use crate::gateway::{Gateway, NewOrder, OrderUpdate};
use crate::metrics::{GridMetrics, MetricsSink};
use crate::state::{
    counter_direction, counter_rung_amount, counter_rung_price, plan_seed_ladder, primary_direction,
    primary_rung_amount, primary_rung_price, GridState, OrderDirection, OrderStatus, RestingOrder,
};

async fn place(
    config: &GridConfig,
    gateway: &dyn Gateway,
    state: &mut GridState,
    direction: OrderDirection,
    price: f64,
    amount: f64,
    rung: u32,
) -> Result<(), GatewayError> {
    let placed = gateway
        .create_order(&config.symbol, NewOrder { direction, price, amount })
        .await?;
    state.orders.insert(
        placed.order_id.clone(),
        RestingOrder {
            order_id: placed.order_id,
            direction,
            price,
            amount,
            rung,
            status: OrderStatus::Open,
        },
    );
    Ok(())
}

async fn cancel(config: &GridConfig, gateway: &dyn Gateway, state: &mut GridState, order_id: &str) -> Result<(), GatewayError> {
    gateway.cancel_order(&config.symbol, order_id).await?;
    if let Some(order) = state.orders.get_mut(order_id) {
        order.status = OrderStatus::Cancelled;
    }
    Ok(())
}

/// One-time seeding of the primary side, run the first time a valid book
/// price arrives. Counter-side orders are never seeded directly; they are
/// created by `handle_fill` as primaries fill. Seeding happens exactly once
/// per process.
pub async fn seed_ladder(
    config: &GridConfig,
    gateway: &dyn Gateway,
    state: &mut GridState,
) -> Result<(), GatewayError> {
    if state.seeded || !state.book.is_valid() {
        return Ok(());
    }
    let mid = state.book.mid();
    let plan = plan_seed_ladder(config, mid);
    for rung in &plan {
        place(config, gateway, state, rung.direction, rung.price, rung.amount, rung.rung).await?;
    }
    state.seeded = true;
    log::info!("seeded {} initial {:?} orders for {} around mid {}", config.num_orders, primary_direction(config), config.symbol, mid);
    Ok(())
}

/// Reacts to a single fill. A primary fill posts a counter order one
/// rung-width away; a counter fill replenishes the primary side and credits
/// `match_profit` for the round trip it closes.
pub async fn handle_fill(
    config: &GridConfig,
    gateway: &dyn Gateway,
    state: &mut GridState,
    update: OrderUpdate,
) -> Result<(), GatewayError> {
    let sign = config.side_bias.sign();
    let Some((direction, rung, fill_price, filled_amount)) = state.apply_fill(config, &update.order_id, update.filled_amount) else {
        log::warn!("fill for unknown order {}", update.order_id);
        return Ok(());
    };
    state.orders.remove(&update.order_id);

    let amount = config.round_amount(filled_amount);
    if direction == primary_direction(config) {
        let counter_price = config.round_price(fill_price * (1.0 + sign * config.spread));
        place(config, gateway, state, counter_direction(config), counter_price, amount, rung).await?;
        log::info!("primary fill on rung {rung} at {fill_price} -> counter at {counter_price}");
    } else {
        state.match_profit += config.notional * config.spread;
        let replenish_price = config.round_price(fill_price * (1.0 - sign * config.spread));
        place(config, gateway, state, primary_direction(config), replenish_price, amount, rung).await?;
        log::info!(
            "counter fill on rung {rung} at {fill_price} -> primary replenish at {replenish_price}, match_profit={}",
            state.match_profit
        );
    }
    Ok(())
}

/// Three-phase ladder maintenance, run periodically and right after a fill.
///
/// Phase A fires when counters have overgrown primaries by more than 10%:
/// cancels the excess counters (farthest-from-mid first) and posts
/// replacement primaries cascading one step beyond the nearest surviving
/// primary.
///
/// Phase B fires when primaries have overgrown counters by more than 10%
/// *and* net position leaves room for more counters (invariant I1): cancels
/// the excess primaries (farthest-from-mid first) and posts replacement
/// counters cascading one step beyond the farthest surviving counter.
///
/// Phase C waits out order settlement, refetches open orders from the
/// venue, then brings the combined open-order count back to exactly
/// `num_orders` — topping up on the primary side or trimming from the book
/// extremes across both sides.
pub async fn rebalance_pass(
    config: &GridConfig,
    gateway: &dyn Gateway,
    state: &mut GridState,
) -> Result<(), GatewayError> {
    if !state.seeded || !state.book.is_valid() {
        return Ok(());
    }
    let primary = primary_direction(config);
    let counter = counter_direction(config);
    let sign = config.side_bias.sign();
    let budget = config.max_diff_per_pass();

    // Phase A: too many counters. Cancel the diff farthest-from-mid
    // counters and post diff replacement primaries cascading from one step
    // beyond the nearest surviving primary.
    let num_primary_open = state.open_orders_on(primary).len() as u32;
    let num_counter_open = state.open_orders_on(counter).len() as u32;
    if num_counter_open as f64 > num_primary_open as f64 * 1.1 {
        let diff = std::cmp::min(num_counter_open - num_primary_open, budget);
        let reference = match state.nearest_open(primary).map(|o| o.price) {
            Some(nearest) => nearest * (1.0 - sign * config.spread),
            None => {
                log::warn!("phase A: no primary anchor order, falling back to degraded reference price 0");
                0.0
            }
        };
        for i in 0..diff {
            let Some(victim) = state.farthest_open(counter).map(|o| o.order_id.clone()) else {
                break;
            };
            cancel(config, gateway, state, &victim).await?;
            if reference > 0.0 {
                let price = primary_rung_price(config, reference, i);
                let amount = primary_rung_amount(config, price);
                place(config, gateway, state, primary, price, amount, i).await?;
            }
        }
        state.remove_filled_and_cancelled();
    }

    // Phase B: too many primaries, bounded by I1 so a counter is never
    // posted past realized net position. Cancel the diff farthest-from-mid
    // primaries and post diff replacement counters cascading from one step
    // beyond the farthest surviving counter.
    let num_primary_open = state.open_orders_on(primary).len() as u32;
    let num_counter_open = state.open_orders_on(counter).len() as u32;
    if num_primary_open as f64 > num_counter_open as f64 * 1.1 && state.net() > num_counter_open as i64 {
        let room = (state.net() - num_counter_open as i64) as u32;
        let diff = std::cmp::min(std::cmp::min(num_primary_open - num_counter_open, budget), room);
        let reference = match state.farthest_open(counter).map(|o| o.price) {
            Some(farthest) => farthest * (1.0 + sign * config.spread),
            None => {
                log::warn!("phase B: no counter anchor order, falling back to degraded reference price 0");
                0.0
            }
        };
        for i in 0..diff {
            let Some(victim) = state.farthest_open(primary).map(|o| o.order_id.clone()) else {
                break;
            };
            cancel(config, gateway, state, &victim).await?;
            if reference > 0.0 {
                let price = counter_rung_price(config, reference, i);
                let amount = counter_rung_amount(config, price);
                place(config, gateway, state, counter, price, amount, i).await?;
            }
        }
        state.remove_filled_and_cancelled();
    }

    // Phase C: settle delay, refetch from the venue, then bring the total
    // open-order count (both sides combined) back to exactly num_orders.
    tokio::time::sleep(Duration::from_millis(settle_delay_ms())).await;
    let live = gateway.fetch_open_orders(&config.symbol).await?;
    reconcile_with_venue(state, &live);

    let total_open = state.open_order_count() as u32;
    if total_open < config.num_orders {
        let shortfall = config.num_orders - total_open;
        let reference = match state.farthest_open(primary).map(|o| o.price) {
            Some(farthest) => farthest,
            None => state.book.mid(),
        };
        for i in 0..shortfall {
            let price = primary_rung_price(config, reference, i);
            let amount = primary_rung_amount(config, price);
            place(config, gateway, state, primary, price, amount, i).await?;
        }
    } else if total_open > config.num_orders {
        let excess = total_open - config.num_orders;
        let mid = state.book.mid();
        let mut all: Vec<&RestingOrder> = state.orders.values().filter(|o| o.status == OrderStatus::Open).collect();
        all.sort_by(|a, b| (b.price - mid).abs().partial_cmp(&(a.price - mid).abs()).unwrap());
        let to_cancel: Vec<String> = all.into_iter().take(excess as usize).map(|o| o.order_id.clone()).collect();
        for id in to_cancel {
            cancel(config, gateway, state, &id).await?;
        }
        state.remove_filled_and_cancelled();
    }

    Ok(())
}

/// Mid-point of the spec's 50-200ms settle window, giving cancels time to
/// reflect on the venue before the refetch.
fn settle_delay_ms() -> u64 {
    100
}

/// Drops any locally-held open order the venue no longer reports as open,
/// without touching orders the venue still agrees are live. Makes Phase C
/// idempotent across repeated passes (P6).
fn reconcile_with_venue(state: &mut GridState, live: &[crate::gateway::PlacedOrder]) {
    let live_ids: std::collections::HashSet<&str> = live.iter().map(|o| o.order_id.as_str()).collect();
    for order in state.orders.values_mut() {
        if order.status == OrderStatus::Open && !live_ids.contains(order.order_id.as_str()) {
            order.status = OrderStatus::Cancelled;
        }
    }
    state.remove_filled_and_cancelled();
}

pub fn snapshot_metrics(config: &GridConfig, state: &GridState) -> GridMetrics {
    GridMetrics {
        venue: config.venue_name.clone(),
        account: config.account_tag.clone(),
        symbol: config.symbol.clone(),
        net_position: state.net() as f64,
        open_orders: state.open_order_count(),
        fills_processed: state.fills_processed,
        approx_fee: state.approx_fee(),
        match_profit: state.match_profit,
        updated_at: chrono::Utc::now(),
    }
}

pub async fn publish(sink: &Arc<dyn MetricsSink>, config: &GridConfig, state: &GridState) {
    sink.upsert(&snapshot_metrics(config, state)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SideBias;
    use crate::gateway::sim::SimGateway;
    use crate::state::BookTop;

    fn cfg() -> GridConfig {
        GridConfig {
            symbol: "BTC/USDT".into(),
            side_bias: SideBias::Long,
            spread: 0.005,
            notional: 1000.0,
            num_orders: 10,
            price_decimals: 2,
            amount_decimals: 2,
            contract_size: 0.01,
            venue_name: "okx".into(),
            account_tag: "acct".into(),
        }
    }

    #[tokio::test]
    async fn seed_ladder_places_primary_side_only() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            ..Default::default()
        };
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        assert!(state.seeded);
        assert_eq!(state.open_order_count(), config.num_orders as usize);
        assert!(state.orders.values().all(|o| o.direction == OrderDirection::Buy));
        assert_eq!(state.net(), 0);
        assert_eq!(state.open_orders_on(OrderDirection::Sell).len(), 0);
    }

    #[tokio::test]
    async fn seed_ladder_is_idempotent() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            ..Default::default()
        };
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        let count_after_first = state.open_order_count();
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        assert_eq!(state.open_order_count(), count_after_first);
    }

    #[tokio::test]
    async fn primary_fill_posts_counter_and_leaves_match_profit_untouched() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            ..Default::default()
        };
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        let buy_order = state.orders.values().next().unwrap().clone();
        handle_fill(
            &config,
            &gateway,
            &mut state,
            OrderUpdate {
                order_id: buy_order.order_id.clone(),
                filled_amount: buy_order.amount,
                fully_filled: true,
                position_side: None,
            },
        )
        .await
        .unwrap();
        assert!(!state.orders.contains_key(&buy_order.order_id));
        assert_eq!(state.match_profit, 0.0);
        assert_eq!(state.net(), 1);
        assert!(state
            .orders
            .values()
            .any(|o| o.direction == OrderDirection::Sell && o.rung == buy_order.rung));
    }

    #[tokio::test]
    async fn counter_fill_credits_exact_notional_times_spread() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            ..Default::default()
        };
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        let buy_order = state.orders.values().next().unwrap().clone();
        handle_fill(
            &config,
            &gateway,
            &mut state,
            OrderUpdate {
                order_id: buy_order.order_id.clone(),
                filled_amount: buy_order.amount,
                fully_filled: true,
                position_side: None,
            },
        )
        .await
        .unwrap();
        let sell_order = state
            .orders
            .values()
            .find(|o| o.direction == OrderDirection::Sell)
            .unwrap()
            .clone();
        handle_fill(
            &config,
            &gateway,
            &mut state,
            OrderUpdate {
                order_id: sell_order.order_id.clone(),
                filled_amount: sell_order.amount,
                fully_filled: true,
                position_side: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(state.match_profit, config.notional * config.spread);
        assert_eq!(state.net(), 0);
    }

    #[tokio::test]
    async fn rebalance_pass_tops_primary_up_to_num_orders_via_phase_c() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            seeded: true,
            ..Default::default()
        };
        rebalance_pass(&config, &gateway, &mut state).await.unwrap();
        assert_eq!(state.open_orders_on(OrderDirection::Buy).len() as u32, config.num_orders);
    }

    /// Places an order through the gateway (so SimGateway's own open-order
    /// list agrees with local state for Phase C's refetch) and registers it
    /// in `state` at the given price/rung.
    async fn seed_order(
        gateway: &SimGateway,
        state: &mut GridState,
        direction: OrderDirection,
        price: f64,
        amount: f64,
        rung: u32,
    ) {
        let placed = gateway
            .create_order("BTC/USDT", crate::gateway::NewOrder { direction, price, amount })
            .await
            .unwrap();
        state.orders.insert(
            placed.order_id.clone(),
            RestingOrder {
                order_id: placed.order_id,
                direction,
                price,
                amount,
                rung,
                status: OrderStatus::Open,
            },
        );
    }

    #[tokio::test]
    async fn rebalance_pass_phase_a_cancels_excess_counters_past_hysteresis() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            seeded: true,
            total_primary_filled: 1,
            ..Default::default()
        };
        seed_order(&gateway, &mut state, OrderDirection::Buy, 99.0, 10.0, 0).await;
        for rung in 0..5u32 {
            seed_order(&gateway, &mut state, OrderDirection::Sell, 100.5 + rung as f64, 1.0, rung).await;
        }
        rebalance_pass(&config, &gateway, &mut state).await.unwrap();
        let num_counter_open = state.open_orders_on(OrderDirection::Sell).len() as u32;
        let num_primary_open = state.open_orders_on(OrderDirection::Buy).len() as u32;
        assert!(num_counter_open as f64 <= num_primary_open as f64 * 1.1 + 1.0);
    }

    #[tokio::test]
    async fn rebalance_pass_phase_b_respects_net_position_guard() {
        let config = cfg();
        let gateway = SimGateway::new();
        // net() == 0 with no counters open: phase B must not post counters
        // past net, since num_counter_open (0) already equals net (0).
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            seeded: true,
            ..Default::default()
        };
        for rung in 0..10u32 {
            seed_order(&gateway, &mut state, OrderDirection::Buy, 100.0 - rung as f64 * 0.5, 10.0, rung).await;
        }
        rebalance_pass(&config, &gateway, &mut state).await.unwrap();
        assert_eq!(state.open_orders_on(OrderDirection::Sell).len(), 0);
    }

    #[tokio::test]
    async fn rebalance_pass_is_idempotent_when_already_balanced() {
        let config = cfg();
        let gateway = SimGateway::new();
        let mut state = GridState {
            book: BookTop { bid: 100.0, ask: 100.1 },
            ..Default::default()
        };
        seed_ladder(&config, &gateway, &mut state).await.unwrap();
        rebalance_pass(&config, &gateway, &mut state).await.unwrap();
        let count_after_first = state.open_order_count();
        rebalance_pass(&config, &gateway, &mut state).await.unwrap();
        assert_eq!(state.open_order_count(), count_after_first);
    }
}
