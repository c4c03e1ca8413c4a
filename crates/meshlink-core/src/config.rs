//! Configuration system for meshlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshlink/config.toml
//!   3. ~/.config/meshlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::Listener;

/// Absolute bounds for any dial retry interval.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub const MIN_RETRY_BACKOFF_FACTOR: f64 = 1.0;
pub const MAX_RETRY_BACKOFF_FACTOR: f64 = 100.0;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshlinkConfig {
    pub router: RouterConfig,
    pub links: RegistryConfig,
    pub dialer: DialerConfig,
    pub pools: PoolConfig,
    pub api: ApiConfig,
    pub listeners: Vec<LinkListenerConfig>,
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// This router's id. Peers see it as the link destination id.
    pub id: String,
    /// Software version advertised to peers.
    pub version: String,
}

/// Registry timing knobs. Every value is a duration in the unit its name says.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub queue_check_interval_secs: u64,
    pub full_scan_interval_secs: u64,
    pub metrics_gc_interval_secs: u64,
    pub notify_send_timeout_secs: u64,
    /// Delay before closing a link that lost a duplicate race.
    pub duplicate_close_delay_secs: u64,
    /// Delay before closing a link that was replaced, so circuits can re-route.
    pub superseded_close_delay_secs: u64,
    /// Unhealthy destinations with no established links are dropped after this.
    pub dest_gc_age_hours: u64,
    /// Controllers contacted within this window must acknowledge faults.
    pub fault_contact_window_secs: u64,
    /// An existing link may reject this many duplicates before it yields.
    pub max_duplicate_rejections: u32,
    pub known_link_id_timeout_ms: u64,
}

/// One dial retry curve. All three fields are required when the table is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub min_retry_interval_ms: u64,
    pub max_retry_interval_ms: u64,
    pub retry_backoff_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Groups this dialer belongs to. Listeners sharing a group get dialed.
    pub groups: Vec<String>,
    /// Local binding. Empty = default.
    pub binding: String,
    pub connect_timeout_secs: u64,
    pub healthy_backoff: BackoffConfig,
    pub unhealthy_backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub dialer_workers: usize,
    pub dialer_queue: usize,
    pub rate_limiter_workers: usize,
    pub rate_limiter_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local operator API port on 127.0.0.1.
    pub port: u16,
}

/// A local link listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkListenerConfig {
    pub bind: String,
    pub protocol: String,
    pub groups: Vec<String>,
    /// Empty = default.
    pub binding: String,
}

/// A statically configured peer router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub id: String,
    pub version: String,
    pub listeners: Vec<Listener>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: "v0.0.0".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_check_interval_secs: 5,
            full_scan_interval_secs: 60,
            metrics_gc_interval_secs: 60,
            notify_send_timeout_secs: 10,
            duplicate_close_delay_secs: 30,
            superseded_close_delay_secs: 60,
            dest_gc_age_hours: 48,
            fault_contact_window_secs: 120,
            max_duplicate_rejections: 5,
            known_link_id_timeout_ms: 1000,
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            groups: vec!["default".to_string()],
            binding: String::new(),
            connect_timeout_secs: 10,
            healthy_backoff: BackoffConfig::healthy(),
            unhealthy_backoff: BackoffConfig::unhealthy(),
        }
    }
}

impl DialerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dialer_workers: 10,
            dialer_queue: 1000,
            rate_limiter_workers: 5,
            rate_limiter_queue: 5,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9101 }
    }
}

impl Default for LinkListenerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:6262".to_string(),
            protocol: "tcp".to_string(),
            groups: vec!["default".to_string()],
            binding: String::new(),
        }
    }
}

// ── Backoff ───────────────────────────────────────────────────────────────────

impl BackoffConfig {
    /// Curve used while the destination is reported healthy.
    pub fn healthy() -> Self {
        Self {
            min_retry_interval_ms: 5_000,
            max_retry_interval_ms: 5 * 60 * 1000,
            retry_backoff_factor: 1.5,
        }
    }

    /// Curve used while the destination is reported unhealthy.
    pub fn unhealthy() -> Self {
        Self {
            min_retry_interval_ms: 60 * 1000,
            max_retry_interval_ms: 60 * 60 * 1000,
            retry_backoff_factor: 10.0,
        }
    }

    pub fn min_retry_interval(&self) -> Duration {
        Duration::from_millis(self.min_retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn retry_backoff_factor(&self) -> f64 {
        self.retry_backoff_factor
    }

    /// Next delay after a failure: `current * factor`, clamped to `[min, max]`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.retry_backoff_factor;
        let max = self.max_retry_interval();
        let next = if scaled.is_finite() && scaled >= 0.0 && scaled < max.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            max
        };
        next.max(self.min_retry_interval()).min(max)
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            field: name.to_string(),
            reason,
        };

        if !(MIN_RETRY_BACKOFF_FACTOR..=MAX_RETRY_BACKOFF_FACTOR).contains(&self.retry_backoff_factor) {
            return Err(invalid(format!(
                "retry_backoff_factor of {} is outside [{}, {}]",
                self.retry_backoff_factor, MIN_RETRY_BACKOFF_FACTOR, MAX_RETRY_BACKOFF_FACTOR
            )));
        }
        for (label, value) in [
            ("min_retry_interval", self.min_retry_interval()),
            ("max_retry_interval", self.max_retry_interval()),
        ] {
            if value < MIN_RETRY_INTERVAL || value > MAX_RETRY_INTERVAL {
                return Err(invalid(format!(
                    "{label} of {value:?} is outside [{MIN_RETRY_INTERVAL:?}, {MAX_RETRY_INTERVAL:?}]"
                )));
            }
        }
        if self.min_retry_interval_ms > self.max_retry_interval_ms {
            return Err(invalid(
                "min_retry_interval is larger than max_retry_interval".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::healthy()
    }
}

impl RegistryConfig {
    /// Intervals drive tokio timers, which reject zero periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("links.queue_check_interval_secs", self.queue_check_interval_secs),
            ("links.full_scan_interval_secs", self.full_scan_interval_secs),
            ("links.metrics_gc_interval_secs", self.metrics_gc_interval_secs),
            ("links.notify_send_timeout_secs", self.notify_send_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn queue_check_interval(&self) -> Duration {
        Duration::from_secs(self.queue_check_interval_secs)
    }

    pub fn full_scan_interval(&self) -> Duration {
        Duration::from_secs(self.full_scan_interval_secs)
    }

    pub fn metrics_gc_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_gc_interval_secs)
    }

    pub fn notify_send_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_send_timeout_secs)
    }

    pub fn duplicate_close_delay(&self) -> Duration {
        Duration::from_secs(self.duplicate_close_delay_secs)
    }

    pub fn superseded_close_delay(&self) -> Duration {
        Duration::from_secs(self.superseded_close_delay_secs)
    }

    pub fn dest_gc_age(&self) -> Duration {
        Duration::from_secs(self.dest_gc_age_hours * 60 * 60)
    }

    pub fn fault_contact_window(&self) -> Duration {
        Duration::from_secs(self.fault_contact_window_secs)
    }

    pub fn known_link_id_timeout(&self) -> Duration {
        Duration::from_millis(self.known_link_id_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshlinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Check values the loader can't express as types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dialer.healthy_backoff.validate("dialer.healthy_backoff")?;
        self.dialer.unhealthy_backoff.validate("dialer.unhealthy_backoff")?;
        self.links.validate()?;
        if self.pools.dialer_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "pools.dialer_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pools.rate_limiter_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "pools.rate_limiter_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Apply MESHLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESHLINK_ROUTER__ID") {
            self.router.id = v;
        }
        if let Ok(v) = std::env::var("MESHLINK_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
        if let Ok(v) = std::env::var("MESHLINK_POOLS__DIALER_WORKERS") {
            if let Ok(n) = v.parse() {
                self.pools.dialer_workers = n;
            }
        }
    }
}
