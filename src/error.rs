use thiserror::Error;

/// Top-level error type for the arbitrage engine.
///
/// Every component-local error enum converts into this at its boundary (see
/// [`OrderError`] and [`GuardError`] below) so the executor and scanner only ever
/// match on these seven kinds, never on a venue- or cache-specific representation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// HTTP/WS transport failure talking to a venue or the chain RPC.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP 429 from a venue; caller must obey the returned back-off.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Venue rejected an order outright (bad request / validation failure on their side).
    #[error("order rejected by venue: {0}")]
    BadRequest(String),

    /// A freshness gate failed (book or order-status too stale to act on).
    #[error("stale data: {0}")]
    StaleData(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An invariant was violated (e.g. filled quantity went backwards). Task-fatal.
    #[error("invariant violated: {0}")]
    Logic(String),

    /// Configuration is invalid; fail fast at boot.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("config source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet/signing error: {0}")]
    Signing(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for the kinds that the guard/scan loops should log-and-retry rather
    /// than propagate as task-fatal (§7 propagation policy).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(_)
                | EngineError::Http(_)
                | EngineError::WebSocket(_)
                | EngineError::RateLimited(_)
                | EngineError::Timeout(_)
        )
    }
}

/// Errors from placing, cancelling, or querying an order at a venue.
///
/// Converted into [`EngineError`] at the venue-client boundary rather than leaked
/// into the executor directly.
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("order already filled")]
    AlreadyFilled,

    #[error("order already cancelled")]
    AlreadyCancelled,

    #[error("venue rejected order: {reason}")]
    Rejected { reason: String },

    #[error("timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u32 },
}

impl From<OrderError> for EngineError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Rejected { reason } => EngineError::BadRequest(reason),
            OrderError::Timeout { elapsed_ms } => {
                EngineError::Timeout(std::time::Duration::from_millis(elapsed_ms))
            }
            other => EngineError::Logic(other.to_string()),
        }
    }
}

/// Errors raised by the executor's price/depth guards.
#[derive(Error, Debug, Clone)]
pub enum GuardError {
    #[error("hedge venue depth unknown (API failure) — skipping cycle")]
    DepthUnknown,

    #[error("ghost depth: hedge IOC returned 0 filled against visible book")]
    GhostDepth,

    #[error("price guard triggered: hedge price {price} breached limit {limit}")]
    PriceBreach {
        price: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },
}

impl From<GuardError> for EngineError {
    fn from(err: GuardError) -> Self {
        EngineError::Logic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::RateLimited("x".into()).is_transient());
        assert!(!EngineError::Logic("x".into()).is_transient());
        assert!(!EngineError::Config("x".into()).is_transient());
    }

    #[test]
    fn order_error_maps_to_bad_request() {
        let e: EngineError = OrderError::Rejected {
            reason: "tick size".into(),
        }
        .into();
        assert!(matches!(e, EngineError::BadRequest(_)));
    }
}
