//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Storage failures. Always reported to the caller, never retried here.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite or row conversion error.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A single attachment that could not be archived. This is data, not an
/// abort: the owning message is still stored without it.
#[derive(Error, Debug)]
#[error("attachment {id}: {reason}")]
pub struct FetchFailure {
    pub id: String,
    pub reason: FetchFailureReason,
}

#[derive(Error, Debug)]
pub enum FetchFailureReason {
    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    /// The fetcher is shutting down and no longer hands out download slots.
    #[error("fetcher closed")]
    Closed,
}

impl From<reqwest::Error> for FetchFailureReason {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e)
        }
    }
}
