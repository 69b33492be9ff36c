// ─────────────────────────────────────────────────────────────────────────────
// metrics.rs — Periodic keyed upsert of grid stats to an external sink.
//
// A keyed upsert of {venue, account, symbol} stats, written on every fill
// and on a periodic tick.
// ─────────────────────────────────────────────────────────────────────────────
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GridMetrics {
    pub venue: String,
    pub account: String,
    pub symbol: String,
    pub net_position: f64,
    pub open_orders: usize,
    pub fills_processed: u64,
    pub approx_fee: f64,
    pub match_profit: f64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn upsert(&self, metrics: &GridMetrics);
}

/// Discards everything. Used where no metrics backend is configured.
pub struct NullMetricsSink;

#[async_trait]
impl MetricsSink for NullMetricsSink {
    async fn upsert(&self, _metrics: &GridMetrics) {}
}

pub struct RedisMetricsSink {
    client: redis::Client,
}

impl RedisMetricsSink {
    pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    fn key(metrics: &GridMetrics) -> String {
        format!("grid:{}:{}:{}", metrics.venue, metrics.account, metrics.symbol)
    }
}

#[async_trait]
impl MetricsSink for RedisMetricsSink {
    async fn upsert(&self, metrics: &GridMetrics) {
        let payload = match serde_json::to_string(metrics) {
            Ok(p) => p,
            Err(e) => {
                log::error!("failed to serialize grid metrics: {e}");
                return;
            }
        };
        let key = Self::key(metrics);
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                use redis::AsyncCommands;
                if let Err(e) = conn.set::<_, _, ()>(&key, payload).await {
                    log::warn!("redis metrics upsert for {key} failed: {e}");
                }
            }
            Err(e) => log::warn!("redis connection for metrics upsert failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_accepts_anything() {
        let sink = NullMetricsSink;
        let metrics = GridMetrics {
            venue: "okx".into(),
            account: "acct".into(),
            symbol: "BTC/USDT".into(),
            net_position: 1.5,
            open_orders: 6,
            fills_processed: 3,
            approx_fee: 0.12,
            match_profit: 0.4,
            updated_at: chrono::Utc::now(),
        };
        sink.upsert(&metrics).await;
    }

    #[test]
    fn key_is_stable_for_same_identity() {
        let metrics = GridMetrics {
            venue: "okx".into(),
            account: "acct".into(),
            symbol: "BTC/USDT".into(),
            net_position: 0.0,
            open_orders: 0,
            fills_processed: 0,
            approx_fee: 0.0,
            match_profit: 0.0,
            updated_at: chrono::Utc::now(),
        };
        assert_eq!(RedisMetricsSink::key(&metrics), "grid:okx:acct:BTC/USDT");
    }
}
