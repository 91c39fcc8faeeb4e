use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong between the client and the remote service.
///
/// Cloneable so it can ride along in status events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("outbox storage failure: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            detail: detail.into(),
        }
    }

    /// The service answers 409 when a decision for the item already exists.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SyncError::Rejected { status: 409, .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            SyncError::Decode(_) | SyncError::Invalid(_) | SyncError::Storage(_) => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::rejected(status.as_u16(), err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Storage(format!("{err:#}"))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid server url '{url}': {reason}")]
    ServerUrl { url: String, reason: String },
}
