//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wt_core::{DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_PENDING_WINDOWS, TrackerConfig};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Base URL of the activity collector.
    pub api_base_url: String,
    /// Minimum dwell time before a visit counts.
    pub debounce_ms: u64,
    /// Attribution tick cadence.
    pub tick_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// Lead time before token expiry at which the token is refreshed.
    pub refresh_buffer_secs: u64,
    pub request_timeout_secs: u64,
    /// How often the in-memory activity buffer is written to the store.
    pub persist_interval_secs: u64,
    /// Bound on undelivered windows kept in memory.
    pub max_pending_windows: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("api_base_url", &self.api_base_url)
            .field("debounce_ms", &self.debounce_ms)
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("refresh_buffer_secs", &self.refresh_buffer_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("persist_interval_secs", &self.persist_interval_secs)
            .field("max_pending_windows", &self.max_pending_windows)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("wt.db"),
            api_base_url: "http://localhost:8080".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS.unsigned_abs(),
            tick_interval_ms: 1_000,
            heartbeat_interval_secs: 30,
            refresh_buffer_secs: 60,
            request_timeout_secs: 30,
            persist_interval_secs: 15,
            max_pending_windows: DEFAULT_MAX_PENDING_WINDOWS,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (WT_*)
        figment = figment.merge(Env::prefixed("WT_"));

        figment.extract()
    }

    /// Engine tunables derived from this configuration.
    #[must_use]
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            debounce: millis(self.debounce_ms),
            max_pending_windows: self.max_pending_windows,
        }
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn refresh_buffer(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.refresh_buffer_secs).unwrap_or(i64::MAX / 1_000))
    }
}

fn millis(ms: u64) -> TimeDelta {
    TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000))
}

/// Returns the platform-specific config directory for wt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt"))
}

/// Returns the platform-specific data directory for wt.
///
/// On Linux: `~/.local/share/wt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("wt"))
}
