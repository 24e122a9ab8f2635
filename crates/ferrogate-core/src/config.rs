use crate::egress::{PoolConfig, RetrySettings};
use crate::session::SessionCacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Proxy configuration
///
/// One flat JSON document; every component receives the values it needs as
/// explicit constructor arguments via the derived accessors below, never
/// through shared mutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Cap on open upstream connections, per route and in total
    /// (default: 25, 0 disables pooling)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Park released connections for reuse (default: true)
    #[serde(default = "default_reuse_connections")]
    pub reuse_connections: bool,

    /// Keep-alive in seconds when the upstream gives no hint (default: 5)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Flat wait between retry attempts in seconds (default: 1)
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Additional attempts after the first (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt upstream exchange timeout in seconds (default: 5)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Bound on waiting for pool capacity in seconds (default: 5)
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Connection establishment timeout in milliseconds (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle connections older than this are closed in seconds (default: 5)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Session cache sizing
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
}

fn default_max_connections() -> usize {
    25
}

fn default_reuse_connections() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_retry_interval_secs() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_secs() -> u64 {
    5
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            max_connections: default_max_connections(),
            reuse_connections: default_reuse_connections(),
            keep_alive_secs: default_keep_alive_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            session_cache: SessionCacheConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ProxyConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs cannot be 0".to_string(),
            ));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "acquire_timeout_secs cannot be 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms cannot be 0".to_string(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs cannot be 0".to_string(),
            ));
        }
        if self.session_cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "session_cache.capacity cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Pool construction values
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            reuse_connections: self.reuse_connections,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    /// Retry orchestrator construction values
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_retries: self.max_retries,
            interval: Duration::from_secs(self.retry_interval_secs),
        }
    }

    /// Per-attempt exchange timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        ProxyConfig {
            max_connections: 25,
            reuse_connections: true,
            keep_alive_secs: 5,
            retry_interval_secs: 1,
            max_retries: 2,
            request_timeout_secs: 5,
            acquire_timeout_secs: 5,
            connect_timeout_ms: 10_000,
            idle_timeout_secs: 5,
            session_cache: SessionCacheConfig {
                capacity: 1000,
                staleness_secs: 60,
            },
        }
    }
}
