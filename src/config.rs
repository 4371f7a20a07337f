use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::breaker::BreakerConfig;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Environment variable that overrides [`CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "VINTED_WATCH_CONFIG";

/// Upper bound for either pacing wait (one day).
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

/// Locations of the JSON files the watcher reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_watchers_path")]
    pub watchers_path: PathBuf,
    #[serde(default = "default_items_path")]
    pub items_path: PathBuf,
    #[serde(default = "default_headers_path")]
    pub headers_path: PathBuf,
}

fn default_watchers_path() -> PathBuf {
    "watchers.json".into()
}

fn default_items_path() -> PathBuf {
    "items.json".into()
}

fn default_headers_path() -> PathBuf {
    "headers.json".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            watchers_path: default_watchers_path(),
            items_path: default_items_path(),
            headers_path: default_headers_path(),
        }
    }
}

/// Pacing of the poll loop. Waits are drawn uniformly from `[max, 2 * max)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_cycle_wait")]
    pub max_wait_between_cycles_secs: u64,
    #[serde(default = "default_watcher_wait")]
    pub max_wait_between_watchers_secs: u64,
    /// Batches the notifier queue holds before the agent blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_cycle_wait() -> u64 {
    120
}

fn default_watcher_wait() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    48
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_wait_between_cycles_secs: default_cycle_wait(),
            max_wait_between_watchers_secs: default_watcher_wait(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Upstream call limits and session handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: u64,
    #[serde(default = "default_credential_retries")]
    pub credential_max_retries: u32,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_credential_ttl() -> u64 {
    60 * 60
}

fn default_credential_retries() -> u32 {
    3
}

fn default_backoff_cap() -> u64 {
    30 * 60
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            credential_ttl_secs: default_credential_ttl(),
            credential_max_retries: default_credential_retries(),
            backoff_cap_secs: default_backoff_cap(),
        }
    }
}

/// Circuit breaker thresholds for the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

fn default_min_requests() -> u32 {
    3
}

fn default_failure_ratio() -> f64 {
    0.6
}

fn default_cooldown() -> u64 {
    60
}

fn default_window() -> u64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            min_requests: default_min_requests(),
            failure_ratio: default_failure_ratio(),
            cooldown_secs: default_cooldown(),
            window_secs: default_window(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        BreakerConfig {
            min_requests: s.min_requests,
            failure_ratio: s.failure_ratio,
            cooldown: Duration::from_secs(s.cooldown_secs),
            window: Duration::from_secs(s.window_secs),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.queue_capacity == 0 {
            bail!("polling.queue_capacity must be at least 1");
        }
        if !(self.breaker.failure_ratio > 0.0 && self.breaker.failure_ratio <= 1.0) {
            bail!("breaker.failure_ratio must be in (0, 1]");
        }
        if self.upstream.credential_max_retries == 0 {
            bail!("upstream.credential_max_retries must be at least 1");
        }
        if self.upstream.request_timeout_secs == 0 {
            bail!("upstream.request_timeout_secs must be at least 1");
        }
        for (key, secs) in [
            ("polling.max_wait_between_cycles_secs", self.polling.max_wait_between_cycles_secs),
            ("polling.max_wait_between_watchers_secs", self.polling.max_wait_between_watchers_secs),
        ] {
            if secs > MAX_WAIT_SECS {
                bail!("{key} must be at most {MAX_WAIT_SECS}");
            }
        }
        if self.breaker.min_requests == 0 {
            bail!("breaker.min_requests must be at least 1");
        }
        if self.breaker.window_secs == 0 {
            bail!("breaker.window_secs must be at least 1");
        }
        if self.breaker.cooldown_secs == 0 {
            bail!("breaker.cooldown_secs must be at least 1");
        }
        Ok(())
    }
}
