// ─────────────────────────────────────────────────────────────────────────────
// supervisor.rs — Wires watchers together and restarts them with backoff.
//
// Spawns long-running tasks and restarts a crashed one with exponential
// backoff rather than letting the whole process die. The same policy wraps
// the Price Watcher, Order Watcher, and a periodic Rebalancer tick.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::GridConfig;
use crate::gateway::Gateway;
use crate::metrics::MetricsSink;
use crate::rebalancer::{publish, rebalance_pass};
use crate::state::GridState;

pub struct Supervisor {
    config: Arc<GridConfig>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<dyn MetricsSink>,
    state: Arc<Mutex<GridState>>,
}

impl Supervisor {
    pub fn new(config: GridConfig, gateway: Arc<dyn Gateway>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
            metrics,
            state: Arc::new(Mutex::new(GridState::default())),
        }
    }

    /// Runs until a fatal startup condition occurs; transient task failures
    /// are retried in place and never returned to the caller.
    pub async fn run(self) -> Result<(), crate::error::GatewayError> {
        self.gateway.load_markets().await?;

        let price_task = {
            let config = self.config.clone();
            let gateway = self.gateway.clone();
            let state = self.state.clone();
            tokio::spawn(supervised(
                "price_watcher".into(),
                move || {
                    let config = config.clone();
                    let gateway = gateway.clone();
                    let state = state.clone();
                    Box::pin(async move { crate::price_watcher::run(config, gateway, state).await })
                },
            ))
        };

        let order_task = {
            let config = self.config.clone();
            let gateway = self.gateway.clone();
            let state = self.state.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(supervised(
                "order_watcher".into(),
                move || {
                    let config = config.clone();
                    let gateway = gateway.clone();
                    let state = state.clone();
                    let metrics = metrics.clone();
                    Box::pin(async move { crate::order_watcher::run(config, gateway, state, metrics).await })
                },
            ))
        };

        let ticker_task = {
            let config = self.config.clone();
            let gateway = self.gateway.clone();
            let state = self.state.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(rebalance_ticker(config, gateway, state, metrics))
        };

        let _ = tokio::join!(price_task, order_task, ticker_task);
        Ok(())
    }
}

/// Periodically runs a maintenance rebalance pass and publishes metrics,
/// independent of fill-triggered passes. Interval is fixed at 5 seconds.
async fn rebalance_ticker(
    config: Arc<GridConfig>,
    gateway: Arc<dyn Gateway>,
    state: Arc<Mutex<GridState>>,
    metrics: Arc<dyn MetricsSink>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let mut guard = state.lock().await;
        if let Err(e) = rebalance_pass(&config, gateway.as_ref(), &mut guard).await {
            log::warn!("periodic rebalance pass failed: {e}");
        }
        publish(&metrics, &config, &guard).await;
    }
}

type WatcherFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), crate::error::GatewayError>> + Send>>;

/// Runs `make_future()` in a loop, restarting with exponential backoff
/// (`min(2^attempt, 60)` seconds) whenever it returns.
async fn supervised(name: String, make_future: impl Fn() -> WatcherFuture) {
    let mut attempt: u32 = 0;
    loop {
        match make_future().await {
            Ok(()) => attempt = 0,
            Err(e) => {
                log::error!("{name} exited: {e}");
                let backoff = 2u64.saturating_pow(attempt).min(60);
                log::info!("restarting {name} in {backoff}s");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SideBias;

    #[test]
    fn backoff_caps_at_sixty_seconds() {
        let compute = |attempt: u32| 2u64.saturating_pow(attempt).min(60);
        assert_eq!(compute(0), 1);
        assert_eq!(compute(6), 60);
        assert_eq!(compute(20), 60);
    }

    #[test]
    fn supervisor_new_starts_unseeded() {
        let config = GridConfig {
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
        };
        let gateway: Arc<dyn Gateway> = Arc::new(crate::gateway::sim::SimGateway::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(crate::metrics::NullMetricsSink);
        let supervisor = Supervisor::new(config, gateway, metrics);
        assert_eq!(Arc::strong_count(&supervisor.state), 1);
    }
}
