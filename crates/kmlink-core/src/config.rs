//! Session configuration
//!
//! Everything a session needs besides the channel itself. Stored as JSON,
//! every field optional with the firmware's defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    RetryPolicy, TransportSettings, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_BAUD_RATE,
    DEFAULT_MAX_ATTEMPTS,
};

/// Errors loading or validating a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid config JSON
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The platform has no per-user config directory
    #[error("Could not find the user config directory")]
    NoConfigDir,
}

/// Backoff between attempts, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Base pause
    pub base_ms: u64,
    /// Uniform random offset, applied in both directions
    pub jitter_ms: u64,
}

impl RetrySettings {
    /// Transport policy with these timings
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }
}

/// Press-timeout monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Time between scans
    pub period_ms: u64,
    /// A press held longer than this is reported
    pub timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            period_ms: 100,
            timeout_ms: 5000,
        }
    }
}

/// Absolute pointer coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Largest x, in pixels
    pub width: u16,
    /// Largest y, in pixels
    pub height: u16,
}

impl Default for Resolution {
    /// What the firmware assumes before it is told otherwise
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Echo timeout per attempt in milliseconds
    pub attempt_timeout_ms: u64,
    /// Attempts per command before it fails
    pub max_attempts: u32,
    /// Backoff for pointer motion and scroll
    pub pointer_retry: RetrySettings,
    /// Backoff for key and button commands
    pub discrete_retry: RetrySettings,
    /// Most commands allowed to wait in the queue
    pub queue_ceiling: usize,
    /// How long the idle worker spins before blocking, in microseconds
    pub idle_spin_us: u64,
    /// How long shutdown waits for the worker, in milliseconds
    pub shutdown_timeout_ms: u64,
    /// Resolution sent when the session opens, if any
    pub resolution: Option<Resolution>,
    /// Press-timeout monitor timing
    pub monitor: MonitorSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pointer_retry: RetrySettings {
                base_ms: 10,
                jitter_ms: 5,
            },
            discrete_retry: RetrySettings {
                base_ms: 120,
                jitter_ms: 20,
            },
            queue_ceiling: 32,
            idle_spin_us: 200,
            shutdown_timeout_ms: 1000,
            resolution: None,
            monitor: MonitorSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Config for `port_name` with every other setting at its default
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("kmlink").join("session.json"))
    }

    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings the transport cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.baud_rate == 0 {
            return Err(invalid("baud_rate", "must be positive"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(invalid("attempt_timeout_ms", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "at least one attempt is required"));
        }
        if self.queue_ceiling == 0 {
            return Err(invalid("queue_ceiling", "must be positive"));
        }
        if self.monitor.period_ms == 0 {
            return Err(invalid("monitor.period_ms", "must be positive"));
        }
        if let Some(res) = self.resolution {
            if res.width == 0 || res.height == 0 {
                return Err(invalid("resolution", "width and height must be positive"));
            }
        }
        Ok(())
    }

    /// Transport timing derived from this config
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            baud_rate: self.baud_rate,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            max_attempts: self.max_attempts,
            pointer_retry: self.pointer_retry.policy(),
            discrete_retry: self.discrete_retry.policy(),
        }
    }

    /// How long the worker spins before it blocks
    pub fn idle_spin(&self) -> Duration {
        Duration::from_micros(self.idle_spin_us)
    }

    /// How long `close` waits for the worker
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
