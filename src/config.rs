//! Configuration for the herald command line tool.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_delivery::{DispatcherConfig, HttpWorkerConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "herald.toml";
const CONFIG_FILE_VAR: &str = "HERALD_CONFIG";
const ENV_PREFIX: &str = "HERALD_";

/// Settings for one herald run, layered from defaults, file and environment.
///
/// Configuration is loaded in priority order:
/// 1. `HERALD_*` environment variables (e.g. `HERALD_CONCURRENCY`)
/// 2. Configuration file (`herald.toml`, or the path in `HERALD_CONFIG`)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// URL each message is posted to.
    ///
    /// Environment variable: `HERALD_DESTINATION`
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Per-message delivery timeout in milliseconds.
    ///
    /// Environment variable: `HERALD_TIMEOUT_MS`
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum concurrent deliveries.
    ///
    /// Environment variable: `HERALD_CONCURRENCY`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Number of stdin lines submitted per `send`.
    ///
    /// Environment variable: `HERALD_BATCH_SIZE`
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Graceful shutdown deadline in seconds.
    ///
    /// Environment variable: `HERALD_SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// User agent sent with each request.
    ///
    /// Environment variable: `HERALD_USER_AGENT`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Config {
    /// Loads configuration from defaults, the config file and environment
    /// overrides, then validates it.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX));

        Self::from_figment(&figment)
            .with_context(|| format!("failed to load configuration from {path}"))
    }

    /// Extracts and validates configuration from an assembled figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().context("invalid configuration values")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the dispatcher configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            concurrency: self.concurrency,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Converts to the HTTP worker configuration.
    pub fn to_worker_config(&self) -> HttpWorkerConfig {
        HttpWorkerConfig {
            destination: self.destination.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            user_agent: self.user_agent.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.destination.trim().is_empty() {
            anyhow::bail!("destination must not be empty");
        }

        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than 0");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_destination() -> String {
    HttpWorkerConfig::default().destination
}

fn default_timeout_ms() -> u64 {
    herald_delivery::DEFAULT_TIMEOUT_SECONDS * 1000
}

fn default_concurrency() -> usize {
    herald_delivery::DEFAULT_CONCURRENCY
}

fn default_batch_size() -> usize {
    32
}

fn default_shutdown_timeout_secs() -> u64 {
    herald_delivery::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_user_agent() -> String {
    format!("herald/{}", env!("CARGO_PKG_VERSION"))
}
