//! Error types for loading items and reading configuration.

use imgview_transfer::TransferError;
use std::io;

/// Failure turning raw bytes into pixels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot decode image: {0}")]
    Image(String),
    #[error("no image data")]
    Empty,
}

/// Why an item could not be materialized.
///
/// [`LoadError::Cancelled`] is not a failure: the pass that asked for the
/// item was superseded and the result is simply not needed any more.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("download failed: {0}")]
    Network(#[from] TransferError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported source: {0}")]
    Unsupported(String),
}

impl LoadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors that can occur while loading or saving [`crate::CacheConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading or writing the configuration file
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid TOML or has the wrong shape
    #[error("invalid configuration file: {0}")]
    Parse(String),
    /// Invalid value for a configuration key or environment variable
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
