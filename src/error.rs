use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure taxonomy for the decision engine. Insufficient indicator history
/// and a computed size of zero are expected steady states and are not
/// represented here; they surface as `CycleOutcome::NoAction`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bar timestamp not strictly after the previous one. The bar is
    /// dropped and the cycle skipped.
    #[error("out-of-order bar: received {received}, last accepted {last}")]
    OutOfOrderBar {
        received: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// Malformed bar (non-finite or inconsistent OHLC values).
    #[error("malformed bar at {timestamp}: {reason}")]
    MalformedBar {
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// Zero or negative stop distance; entry aborted, never retried.
    #[error("invalid risk inputs: {0}")]
    InvalidRisk(String),

    /// The order gateway refused an entry or exit request. The state
    /// machine reverts the transition; retry policy belongs to the gateway.
    #[error("gateway rejected {side} order: {reason}")]
    GatewayRejected { side: &'static str, reason: String },

    /// Unparseable or out-of-range configuration value. Fails fast at
    /// startup, not recoverable at runtime.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport-level failure talking to the broker.
    #[error("broker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Broker returned a response the adapter could not interpret.
    #[error("unexpected broker response: {0}")]
    BrokerResponse(String),
}
