// ─────────────────────────────────────────────────────────────────────────────
// order_watcher.rs — Reacts to fills and drives ladder maintenance.
//
// Subscribes to fill events, applies each one to shared state, posts the
// counter order, then runs a rebalance pass and publishes metrics.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::GridConfig;
use crate::error::GatewayError;
use crate::gateway::{Gateway, OrderUpdate};
use crate::metrics::MetricsSink;
use crate::rebalancer::{handle_fill, publish, rebalance_pass};
use crate::state::GridState;

/// Mirrors a hedge-mode venue's `posSide` filter: an update tagged with a
/// position side other than the grid's own bias belongs to unrelated
/// inventory on the same symbol and must not be dispatched to this grid's
/// Fill Handler.
fn belongs_to_this_grid(config: &GridConfig, update: &OrderUpdate) -> bool {
    match update.position_side {
        Some(side) => side == config.side_bias,
        None => true,
    }
}

pub async fn run(
    config: Arc<GridConfig>,
    gateway: Arc<dyn Gateway>,
    state: Arc<Mutex<GridState>>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<(), GatewayError> {
    let mut rx = gateway.watch_orders(&config.symbol).await?;
    log::info!("order watcher subscribed for {}", config.symbol);
    while let Some(update) = rx.recv().await {
        if update.filled_amount <= 0.0 {
            continue;
        }
        if !belongs_to_this_grid(&config, &update) {
            log::debug!("dropping fill {} on non-matching position side", update.order_id);
            continue;
        }
        let mut guard = state.lock().await;
        if let Err(e) = handle_fill(&config, gateway.as_ref(), &mut guard, update).await {
            log::error!("fill handling failed: {e}");
            continue;
        }
        if let Err(e) = rebalance_pass(&config, gateway.as_ref(), &mut guard).await {
            log::error!("rebalance pass after fill failed: {e}");
        }
        publish(&metrics, &config, &guard).await;
    }
    Err(GatewayError::Transport("order stream closed".into()))
}
