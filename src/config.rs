// ─────────────────────────────────────────────────────────────────────────────
// config.rs — Grid configuration surface
//
// GridConfig is immutable after construction and shared via Arc everywhere.
// Invalid config is a fatal startup error, not a runtime condition — we fail
// fast in `GridConfig::from_env`.
// ─────────────────────────────────────────────────────────────────────────────
use std::fmt;

/// Selects an ascending grid (buys below mid, sells above) or a descending
/// grid (sells above mid, buys below). See GLOSSARY: primary/counter side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideBias {
    Long,
    Short,
}

impl SideBias {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            SideBias::Long => 1.0,
            SideBias::Short => -1.0,
        }
    }

    /// The side that fills first and triggers a counter-posting.
    /// Buys in a long bias, sells in a short bias.
    pub fn primary_order_side(self) -> crate::state::OrderDirection {
        match self {
            SideBias::Long => crate::state::OrderDirection::Buy,
            SideBias::Short => crate::state::OrderDirection::Sell,
        }
    }

    pub fn counter_order_side(self) -> crate::state::OrderDirection {
        self.primary_order_side().opposite()
    }
}

impl fmt::Display for SideBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideBias::Long => write!(f, "long"),
            SideBias::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub symbol: String,
    pub side_bias: SideBias,
    /// Fractional price step between rungs (e.g. 0.0005 = 5bp).
    pub spread: f64,
    /// Quote-currency size per rung.
    pub notional: f64,
    /// Target count of resting orders.
    pub num_orders: u32,
    pub price_decimals: u32,
    pub amount_decimals: u32,
    /// Multiplier converting quote notional to contract units.
    pub contract_size: f64,
    pub venue_name: String,
    pub account_tag: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

impl GridConfig {
    /// Loads and validates configuration from the process environment.
    /// `.env` is loaded first via `dotenvy`, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let symbol = env_var("GRID_SYMBOL")?;
        let side_bias = match env_var("GRID_SIDE_BIAS")?.to_lowercase().as_str() {
            "long" => SideBias::Long,
            "short" => SideBias::Short,
            other => {
                return Err(ConfigError::Invalid(
                    "GRID_SIDE_BIAS",
                    format!("expected 'long' or 'short', got '{other}'"),
                ))
            }
        };
        let spread = env_parse("GRID_SPREAD")?;
        let notional = env_parse("GRID_NOTIONAL")?;
        let num_orders = env_parse("GRID_NUM_ORDERS")?;
        let price_decimals = env_parse_or("GRID_PRICE_DECIMALS", 2)?;
        let amount_decimals = env_parse_or("GRID_AMOUNT_DECIMALS", 2)?;
        let contract_size = env_parse_or("GRID_CONTRACT_SIZE", 1.0)?;
        let venue_name = std::env::var("GRID_VENUE_NAME").unwrap_or_else(|_| "unknown".to_string());
        let account_tag = std::env::var("GRID_ACCOUNT_TAG").unwrap_or_else(|_| "default".to_string());

        let config = Self {
            symbol,
            side_bias,
            spread,
            notional,
            num_orders,
            price_decimals,
            amount_decimals,
            contract_size,
            venue_name,
            account_tag,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("GRID_SYMBOL", "must not be empty".into()));
        }
        if !(self.spread > 0.0) {
            return Err(ConfigError::Invalid("GRID_SPREAD", "must be > 0".into()));
        }
        if self.num_orders == 0 {
            return Err(ConfigError::Invalid("GRID_NUM_ORDERS", "must be > 0".into()));
        }
        if !(self.notional > 0.0) {
            return Err(ConfigError::Invalid("GRID_NOTIONAL", "must be > 0".into()));
        }
        if !(self.contract_size > 0.0) {
            return Err(ConfigError::Invalid("GRID_CONTRACT_SIZE", "must be > 0".into()));
        }
        Ok(())
    }

    /// Caps how aggressively one Rebalancer pass may churn the book.
    pub fn max_diff_per_pass(&self) -> u32 {
        std::cmp::max(1, self.num_orders / 5)
    }

    pub fn round_price(&self, price: f64) -> f64 {
        round_to(price, self.price_decimals)
    }

    pub fn round_amount(&self, amount: f64) -> f64 {
        round_to(amount, self.amount_decimals)
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn env_var(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<T, ConfigError> {
    env_var(key)?
        .parse()
        .map_err(|_| ConfigError::Invalid(key, "not parseable".into()))
}

fn env_parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(key, "not parseable".into())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GridConfig {
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

    #[test]
    fn max_diff_per_pass_floors_at_one() {
        let mut cfg = base_config();
        cfg.num_orders = 3;
        assert_eq!(cfg.max_diff_per_pass(), 1);
        cfg.num_orders = 10;
        assert_eq!(cfg.max_diff_per_pass(), 2);
    }

    #[test]
    fn sign_matches_bias() {
        assert_eq!(SideBias::Long.sign(), 1.0);
        assert_eq!(SideBias::Short.sign(), -1.0);
    }

    #[test]
    fn rounding_matches_seeding_scenario() {
        let cfg = base_config();
        assert_eq!(cfg.round_price(100.00 * 0.995f64.powi(3)), 98.51);
    }
}
