//! Error types for the routing engine
//!
//! Business failures never show up here: an executor that fails produces an
//! [`ExecutionOutcome::Failure`](crate::ExecutionOutcome) value. These types
//! cover infrastructure faults only, which are never turned into a routing
//! decision.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`FailureStore`](crate::FailureStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store did not answer within the configured timeout
    #[error("store operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The store is unreachable or refused the command
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded
    #[error("corrupt value at key '{key}': {value}")]
    Corrupt { key: String, value: String },
    /// Error reported by the Redis client
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors raised by a [`JobTransport`](crate::JobTransport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down
    #[error("transport closed")]
    Closed,
    /// A message could not be emitted to a downstream channel
    #[error("failed to publish to '{channel}': {reason}")]
    Publish { channel: String, reason: String },
    /// Settlement was requested for a delivery the transport does not know
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// Errors that abandon the current delivery
///
/// Infrastructure variants mean the delivery was released back to the broker
/// (or could not be settled at all) and will be redelivered. A malformed
/// delivery has been rejected and will not come back.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The delivery body is not a valid job message
    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors raised while loading or validating [`RouterConfig`](crate::RouterConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConsumeError {
    /// Whether the error comes from infrastructure the broker can retry against
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ConsumeError::Store(_) | ConsumeError::Transport(_))
    }
}
