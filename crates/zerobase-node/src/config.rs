//! Node runner configuration.
//!
//! Looked up, first match wins:
//! - the file given with `--config`
//! - `zerobase.toml`, `/etc/zerobase/zerobase.toml`,
//!   `~/.config/zerobase/zerobase.toml`
//!
//! Every section is optional. `ZEROBASE_METRICS` and `ZEROBASE_METRICS_PORT`
//! seed the metrics defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zerobase_core::{NodeSettings, PublisherConfig, SubscriberConfig, DEFAULT_NODE_NAME};

const SEARCH_PATHS: [&str; 3] = [
    "zerobase.toml",
    "/etc/zerobase/zerobase.toml",
    "~/.config/zerobase/zerobase.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node name used in logs and thread names.
    pub name: String,
    pub publishers: Vec<PublisherConfig>,
    pub subscribers: Vec<SubscriberConfig>,
    pub runtime: RuntimeConfig,
    pub heartbeat: HeartbeatConfig,
    pub metrics: MetricsConfig,
}

/// Receive loop and socket tuning. Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub poll_timeout_ms: u64,
    /// Bound on joining the receive loop at shutdown.
    pub join_timeout_ms: u64,
    pub io_threads: usize,
    /// Per-subscriber queue depth.
    pub high_water_mark: usize,
    pub reconnect_interval_ms: u64,
}

/// Periodic counter published by the main routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub topic: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_NODE_NAME.to_string(),
            publishers: Vec::new(),
            subscribers: Vec::new(),
            runtime: RuntimeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let settings = NodeSettings::default();
        Self {
            poll_timeout_ms: settings.poll_timeout.as_millis() as u64,
            join_timeout_ms: settings.join_timeout.as_millis() as u64,
            io_threads: settings.io_threads,
            high_water_mark: settings.high_water_mark,
            reconnect_interval_ms: settings.reconnect_interval.as_millis() as u64,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: "heartbeat".to_string(),
            interval_ms: 1_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: env_or("ZEROBASE_METRICS", false),
            port: env_or("ZEROBASE_METRICS_PORT", 9090),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            io_threads: self.io_threads,
            high_water_mark: self.high_water_mark,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
        }
    }
}

impl Config {
    /// Load `path` if given, else the first existing file on the search
    /// path, else the defaults.
    ///
    /// # Errors
    ///
    /// An explicit path that cannot be read, or any found file that does
    /// not parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let found = match path {
            Some(path) => Some(path.to_path_buf()),
            None => SEARCH_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        match found {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// # Errors
    ///
    /// The file cannot be read or is not valid TOML for [`Config`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms.max(1))
    }
}
