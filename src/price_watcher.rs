// ─────────────────────────────────────────────────────────────────────────────
// price_watcher.rs — Tracks top-of-book and triggers the one-time seed.
//
// Subscribes once, then loops on the receiver, mutating shared state under
// a lock. Seeds the ladder exactly once, on the first valid price.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::GridConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::rebalancer::seed_ladder;
use crate::state::GridState;

pub async fn run(config: Arc<GridConfig>, gateway: Arc<dyn Gateway>, state: Arc<Mutex<GridState>>) -> Result<(), GatewayError> {
    let mut rx = gateway.watch_bids_asks(&config.symbol).await?;
    log::info!("price watcher subscribed for {}", config.symbol);
    while let Some(top) = rx.recv().await {
        if !top.is_valid() {
            continue;
        }
        let mut guard = state.lock().await;
        guard.book = top;
        if !guard.seeded {
            if let Err(e) = seed_ladder(&config, gateway.as_ref(), &mut guard).await {
                log::error!("initial seeding failed: {e}");
            }
        }
    }
    Err(GatewayError::Transport("book stream closed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SideBias;
    use crate::gateway::sim::SimGateway;

    fn cfg() -> GridConfig {
        GridConfig {
            symbol: "BTC/USDT".into(),
            side_bias: SideBias::Long,
            spread: 0.01,
            notional: 100.0,
            num_orders: 2,
            price_decimals: 2,
            amount_decimals: 4,
            contract_size: 1.0,
            venue_name: "okx".into(),
            account_tag: "acct".into(),
        }
    }

    #[tokio::test]
    async fn run_exits_when_stream_closes() {
        let config = Arc::new(cfg());
        let gateway: Arc<dyn Gateway> = Arc::new(SimGateway::new());
        let state = Arc::new(Mutex::new(GridState::default()));
        let result = run(config, gateway, state).await;
        assert!(result.is_err());
    }
}
