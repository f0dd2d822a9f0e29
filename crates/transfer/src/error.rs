//! Transfer and engine errors.

use crate::TransferId;

/// Why a transfer failed.
///
/// Only [`TransferError::Timeout`] is considered transient; every other
/// variant is surfaced as a failure without retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server responded with HTTP {0}")]
    Status(u16),
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("error reading response body: {0}")]
    Body(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl TransferError {
    /// True for failures worth retrying on the same transfer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Errors returned by [`crate::TransferEngine`] entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transfer engine has been shut down")]
    ShutDown,
    #[error("transfer {0} is not idle")]
    NotIdle(TransferId),
    #[error("failed to start transfer engine: {0}")]
    Start(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(TransferError::Timeout.is_transient());
        assert!(!TransferError::Status(503).is_transient());
        assert!(!TransferError::Connect("reset".into()).is_transient());
        assert!(!TransferError::TooManyRedirects.is_transient());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TransferError::Status(404).to_string(),
            "server responded with HTTP 404"
        );
        assert_eq!(
            EngineError::ShutDown.to_string(),
            "transfer engine has been shut down"
        );
        assert_eq!(EngineError::NotIdle(3).to_string(), "transfer 3 is not idle");
    }
}
