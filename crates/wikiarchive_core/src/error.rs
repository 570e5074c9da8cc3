use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single request/response exchange with the remote API.
///
/// Every variant except `Exhausted` describes one attempt; the retry loop in
/// [`crate::transport`] wraps the last of them into `Exhausted` once the
/// attempt budget is spent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to call MediaWiki API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("MediaWiki API request failed with HTTP {status}")]
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },

    #[error("failed to decode MediaWiki API JSON response: {0}")]
    Decode(String),

    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },

    #[error("MediaWiki API request failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Delay the server asked for before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// API `error` replies are answers, not transient faults, and are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Api { .. } | Self::Exhausted { .. })
    }
}
