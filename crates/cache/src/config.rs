//! Cache configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `IMGVIEW_*` environment variables. Command-line flags are applied
//! on top by the binary.

use crate::ConfigError;
use imgview_scheduler::default_worker_count;
use imgview_transfer::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the prefetch cache and the transfer engine it uses.
///
/// Every key is optional in the file:
///
/// ```toml
/// cache_radius = 2
/// thumbnail_edge = 256
/// thumbnail_workers = 8
/// transfer_poll_ms = 50
///
/// [transfer]
/// max_connections_per_host = 6
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Items on each side of the cursor kept fully decoded
    pub cache_radius: usize,
    /// Longest edge of generated thumbnails, in pixels
    pub thumbnail_edge: u32,
    /// Worker threads building thumbnails
    pub thumbnail_workers: usize,
    /// How often a pass waiting on a download re-checks cancellation
    pub transfer_poll_ms: u64,
    pub transfer: EngineConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_radius: 2,
            thumbnail_edge: 256,
            thumbnail_workers: default_worker_count(),
            transfer_poll_ms: 50,
            transfer: EngineConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Sets the window radius.
    pub fn with_cache_radius(mut self, radius: usize) -> Self {
        self.cache_radius = radius;
        self
    }

    /// Sets the thumbnail edge, at least one pixel.
    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge.max(1);
        self
    }

    /// Sets the thumbnail worker count, at least one.
    pub fn with_thumbnail_workers(mut self, workers: usize) -> Self {
        self.thumbnail_workers = workers.max(1);
        self
    }

    pub fn with_transfer(mut self, transfer: EngineConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn transfer_poll(&self) -> Duration {
        Duration::from_millis(self.transfer_poll_ms.max(1))
    }

    /// `<config dir>/imgview/config.toml`, if the platform has a config dir.
    ///
    /// - Linux: ~/.config/imgview/config.toml
    /// - macOS: ~/Library/Application Support/imgview/config.toml
    /// - Windows: %APPDATA%\imgview\config.toml
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgview").join("config.toml"))
    }

    /// Loads configuration from a TOML file. Missing keys keep their
    /// defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds an out-of-range value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()
    }

    /// Converts configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Applies environment overrides on top of `self`.
    ///
    /// Environment variables:
    /// - `IMGVIEW_CACHE_RADIUS`
    /// - `IMGVIEW_THUMBNAIL_EDGE`
    /// - `IMGVIEW_THUMBNAIL_WORKERS`
    /// - `IMGVIEW_MAX_CONNECTIONS_PER_HOST`
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(radius) = env_value("IMGVIEW_CACHE_RADIUS")? {
            self.cache_radius = radius;
        }
        if let Some(edge) = env_value("IMGVIEW_THUMBNAIL_EDGE")? {
            self.thumbnail_edge = edge;
        }
        if let Some(workers) = env_value("IMGVIEW_THUMBNAIL_WORKERS")? {
            self.thumbnail_workers = workers;
        }
        if let Some(connections) = env_value("IMGVIEW_MAX_CONNECTIONS_PER_HOST")? {
            self.transfer.max_connections_per_host = connections;
        }
        self.validate()
    }

    /// Full layering: defaults, then `path` (or the default config file if
    /// it exists), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        base.with_env()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.thumbnail_edge == 0 {
            return Err(ConfigError::InvalidValue("thumbnail_edge".into()));
        }
        if self.thumbnail_workers == 0 {
            return Err(ConfigError::InvalidValue("thumbnail_workers".into()));
        }
        if self.transfer.max_connections_per_host == 0 {
            return Err(ConfigError::InvalidValue(
                "transfer.max_connections_per_host".into(),
            ));
        }
        Ok(self)
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}
