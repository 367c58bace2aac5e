// /shop-platform/services/event-bus/src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by bus transports
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record position: {0}")]
    InvalidPosition(String),

    #[error("No broker reachable: {0}")]
    Unavailable(String),
}

impl BusError {
    /// Timeouts and broker hiccups are retried on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Timeout(_) | BusError::Broker(_) | BusError::Unavailable(_))
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Broker(err.to_string())
    }
}
