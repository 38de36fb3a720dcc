//! Types exchanged between the engine and chain adapters

use crate::models::CanonicalTransaction;
use std::sync::Arc;
use std::time::Duration;

/// Native balance reported by an adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Exact decimal string in the native asset
    pub balance: String,
    /// Value in the quote currency, when the adapter knows it
    pub value_in_quote: Option<String>,
}

/// One incremental fetch result.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<CanonicalTransaction>,
    /// Highest position observed in this batch, if any
    pub new_checkpoint: Option<u64>,
}

/// Opaque handle for a live push subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Invoked by an adapter for every raw account-activity event.
pub type ActivityCallback = Arc<dyn Fn() + Send + Sync>;

/// Failure modes an adapter may signal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("Adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported capability: {0}")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(429) {
            AdapterError::RateLimited { retry_after: None }
        } else {
            AdapterError::Unavailable(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AdapterError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AdapterError::Unavailable(format!("WebSocket error: {}", e))
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Unavailable(format!("Malformed response: {}", e))
    }
}
