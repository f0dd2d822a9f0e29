//! Transfer engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for [`crate::TransferEngine`].
///
/// Every field is optional when deserialized; missing keys take the
/// default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent connections allowed per remote host
    pub max_connections_per_host: usize,

    /// Redirects followed before the transfer fails
    pub max_redirects: usize,

    /// Extra attempts after a timeout, per transfer
    pub max_retries: u32,

    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Maximum silence while waiting for headers or the next chunk, in milliseconds
    pub stall_timeout_ms: u64,

    /// Reactor housekeeping tick in milliseconds
    pub tick_interval_ms: u64,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 6,
            max_redirects: 5,
            max_retries: 3,
            connect_timeout_ms: 10_000,
            stall_timeout_ms: 30_000,
            tick_interval_ms: 250,
            user_agent: format!("imgview/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EngineConfig {
    /// Set the per-host connection cap (at least one).
    pub fn with_max_connections_per_host(mut self, n: usize) -> Self {
        self.max_connections_per_host = n.max(1);
        self
    }

    /// Set the redirect limit.
    pub fn with_max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = n;
        self
    }

    /// Set how many times a timed-out transfer is retried.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
