//! Error types for the fare date strip.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid search context: {0}")]
    InvalidContext(String),

    #[error("Window index {index} out of range (window size {size})")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("No active search session")]
    NoSession,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure of a single (axis, date) price lookup.
///
/// Every variant is local to one cache key: the scheduler records it as
/// `Errored` and moves on, it never aborts sibling fetches.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("fetch timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("response contained no usable price: {0}")]
    NoUsablePrice(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Upstream data anomalies are handled exactly like transport failures,
    /// this only distinguishes them in logs.
    pub fn is_data_anomaly(&self) -> bool {
        matches!(self, FetchError::NoUsablePrice(_))
    }
}
