use thiserror::Error;

/// Errors surfaced by the [`crate::gateway::Gateway`] trait.
///
/// Every Gateway operation returns a `Result<T, GatewayError>`. The loop
/// boundary in each watcher decides whether a variant is transient (retry
/// with backoff) or terminal (propagate to the Supervisor and shut down).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited")]
    RateLimited,

    #[error("order rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Transport hiccups and rate limiting are retried with exponential
    /// backoff; configuration and rejection errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::RateLimited)
    }
}
