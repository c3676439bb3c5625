//! Configuration types for the reconciliation engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

/// Main operator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Remote client configuration
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Object store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Reconciler settings
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl OperatorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `DBRX_HOST` | Workspace URL (required) |
    /// | `DBRX_TOKEN` | Personal access token (required) |
    /// | `DBRX_TIMEOUT_SECS` | HTTP request timeout |
    /// | `DBRX_STORE_PATH` | File store path; memory store when unset |
    /// | `DBRX_WORKERS` | Worker pool size |
    /// | `DBRX_RESYNC_INTERVAL_SECS` | Resync interval |
    /// | `DBRX_POLL_INTERVAL_SECS` | Progress poll interval |
    /// | `DBRX_MAX_BACKOFF_SECS` | Backoff ceiling |
    pub fn from_env() -> Result<Self, crate::Error> {
        let host = env::var("DBRX_HOST").map_err(|_| crate::Error::config("DBRX_HOST is not set"))?;
        let token =
            env::var("DBRX_TOKEN").map_err(|_| crate::Error::config("DBRX_TOKEN is not set"))?;

        let mut reconcile = ReconcileConfig::default();
        if let Some(workers) = env_parse("DBRX_WORKERS")? {
            reconcile.workers = workers;
        }
        if let Some(secs) = env_parse("DBRX_RESYNC_INTERVAL_SECS")? {
            reconcile.resync_interval_secs = secs;
        }
        if let Some(secs) = env_parse("DBRX_POLL_INTERVAL_SECS")? {
            reconcile.poll_interval_secs = secs;
        }
        if let Some(secs) = env_parse("DBRX_MAX_BACKOFF_SECS")? {
            reconcile.max_backoff_secs = secs;
        }

        let config = Self {
            remote: RemoteConfig::Rest {
                host,
                token,
                timeout_secs: env_parse("DBRX_TIMEOUT_SECS")?.unwrap_or_else(default_timeout_secs),
            },
            store: match env::var("DBRX_STORE_PATH") {
                Ok(path) if !path.is_empty() => StoreConfig::File { path },
                _ => StoreConfig::Memory,
            },
            reconcile,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.remote.validate()?;
        self.store.validate()?;
        self.reconcile.validate()?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, crate::Error> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Remote client configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// REST API client
    Rest {
        /// Workspace URL (e.g., "https://adb-123.azuredatabricks.net")
        host: String,
        /// Bearer token
        token: String,
        /// Per-request timeout in seconds
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom client
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl RemoteConfig {
    /// Validate the remote configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RemoteConfig::Rest {
                host,
                token,
                timeout_secs,
            } => {
                if host.is_empty() {
                    return Err(crate::Error::config("REST host cannot be empty"));
                }
                if !host.starts_with("https://") && !host.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "REST host must be an http(s) URL, got '{}'",
                        host
                    )));
                }
                if token.is_empty() {
                    return Err(crate::Error::config("REST token cannot be empty"));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("REST timeout must be > 0"));
                }
                Ok(())
            }
            RemoteConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom remote factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom remote config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the client type name
    pub fn type_name(&self) -> &str {
        match self {
            RemoteConfig::Rest { .. } => "rest",
            RemoteConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Rest {
            host: String::new(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteConfig::Rest {
                host, timeout_secs, ..
            } => f
                .debug_struct("Rest")
                .field("host", host)
                .field("token", &"<redacted>")
                .field("timeout_secs", timeout_secs)
                .finish(),
            RemoteConfig::Custom { factory, config } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", config)
                .finish(),
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            StoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// First retry delay (in milliseconds)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling (in seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Add up to 25% random jitter to retry delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Bound on every remote call (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// How long a converged object is trusted before remote state is re-read
    ///
    /// Set to 0 to read remote state on every pass.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Requeue delay while a remote resource is transitioning (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Store version conflicts retried within one pass
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Worker pool size
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl ReconcileConfig {
    /// Validate the reconciler settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.base_backoff_ms == 0 {
            return Err(crate::Error::config("base_backoff_ms must be > 0"));
        }
        if Duration::from_millis(self.base_backoff_ms) > Duration::from_secs(self.max_backoff_secs) {
            return Err(crate::Error::config(
                "base_backoff_ms cannot exceed max_backoff_secs",
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(crate::Error::config("remote_timeout_secs must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        if self.workers == 0 {
            return Err(crate::Error::config("workers must be > 0"));
        }
        Ok(())
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            jitter: default_jitter(),
            remote_timeout_secs: default_timeout_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_conflict_retries: default_max_conflict_retries(),
            event_channel_capacity: default_event_channel_capacity(),
            workers: default_workers(),
        }
    }
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_jitter() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}
