// ─────────────────────────────────────────────────────────────────────────────
// grid-order-manager: single-symbol grid trading order manager.
// ─────────────────────────────────────────────────────────────────────────────
mod config;
mod error;
mod gateway;
mod metrics;
mod order_watcher;
mod price_watcher;
mod rebalancer;
mod state;
mod supervisor;

use std::sync::Arc;

use config::GridConfig;
use gateway::rest_ws::RestWsGateway;
use gateway::Gateway;
use metrics::{MetricsSink, NullMetricsSink, RedisMetricsSink};
use supervisor::Supervisor;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("grid-order-manager starting");

    let config = match GridConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    log::info!(
        "symbol={} side_bias={} spread={} num_orders={}",
        config.symbol,
        config.side_bias,
        config.spread,
        config.num_orders
    );

    let venue_url_raw = std::env::var("GRID_VENUE_URL").unwrap_or_else(|_| "https://example-venue.invalid".into());
    let venue_url = match url::Url::parse(&venue_url_raw) {
        Ok(u) => u,
        Err(e) => {
            log::error!("invalid GRID_VENUE_URL '{venue_url_raw}': {e}");
            std::process::exit(1);
        }
    };
    let api_key = std::env::var("GRID_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("GRID_API_SECRET").unwrap_or_default();
    let run_id = uuid::Uuid::new_v4();
    log::info!("run_id={run_id}");
    let gateway: Arc<dyn Gateway> = Arc::new(RestWsGateway::new(venue_url.to_string(), api_key, api_secret));

    let metrics: Arc<dyn MetricsSink> = match std::env::var("REDIS_URL") {
        Ok(url) => match RedisMetricsSink::new(&url) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                log::warn!("failed to build redis metrics sink, falling back to no-op: {e}");
                Arc::new(NullMetricsSink)
            }
        },
        Err(_) => {
            log::info!("REDIS_URL not set, metrics upserts disabled");
            Arc::new(NullMetricsSink)
        }
    };

    let supervisor = Supervisor::new(config, gateway, metrics);
    if let Err(e) = supervisor.run().await {
        log::error!("fatal startup error: {e}");
        std::process::exit(1);
    }
}
