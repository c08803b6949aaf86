//! Error types for the networking layer.
//!
//! # Design
//! Every request failure converges on `RequestError`, which is what failure
//! callbacks receive. The three runtime causes stay distinguishable:
//! `Transport` for I/O and timeouts, `Status` for a non-2xx reply and `Parse`
//! for a body that does not match the declared response type.

use thiserror::Error;

/// Errors delivered to request failure callbacks.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The request never produced an HTTP response (connect, DNS, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// A connect, write or read timeout elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with a status outside 200..300.
    #[error("unexpected response code {code}")]
    Status { code: u16 },

    /// The body could not be deserialized into the declared response type.
    #[error("failed to parse response body: {0}")]
    Parse(String),

    /// The outgoing request could not be assembled (bad URL or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The worker thread for an async call could not be started.
    #[error("failed to dispatch request: {0}")]
    Dispatch(String),
}

impl RequestError {
    /// The HTTP status carried by a `Status` error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::Status { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::Parse(err.to_string())
    }
}

impl From<ureq::Error> for RequestError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Timeout(which) => RequestError::Timeout(which.to_string()),
            ureq::Error::Http(e) => RequestError::InvalidRequest(e.to_string()),
            ureq::Error::BadUri(uri) => RequestError::InvalidRequest(uri),
            other => RequestError::Transport(other.to_string()),
        }
    }
}

/// Errors from the platform package lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("package not found: {0}")]
    PackageNotFound(String),
}

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Errors from the on-disk response cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
