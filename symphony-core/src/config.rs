// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for datafeed tuning
use crate::backoff::BackoffConfig;
use crate::datafeed::PollerConfig;
use crate::traits::ChatUser;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub datafeed: DatafeedConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The authenticated identity the bot runs as
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatafeedConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Consecutive transient failures tolerated before giving up (0 = unlimited)
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint (e.g., "127.0.0.1:9464")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_addr: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rotated log files to the data directory
    #[serde(default)]
    pub file: bool,
}

fn default_max_batch_size() -> usize {
    100
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> u32 {
    2
}

impl Default for DatafeedConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            read_timeout_secs: default_read_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: 0,
        }
    }
}

impl DatafeedConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            max_batch_size: self.max_batch_size,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(self.backoff_initial_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                multiplier: self.backoff_multiplier,
                max_retries: self.max_retries,
            },
        }
    }
}

impl BotConfig {
    pub fn chat_user(&self) -> ChatUser {
        ChatUser {
            id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }
}

impl Config {
    /// Load configuration from the resolved config path with environment overrides.
    ///
    /// A missing file is not an error: defaults plus environment are used.
    pub fn load() -> Result<Self> {
        Self::load_from(&resolve_config_path())
    }

    /// Load from an explicit path (missing file = defaults), then apply env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Config {
                bot: BotConfig::default(),
                datafeed: DatafeedConfig::default(),
                metrics: MetricsConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("SYMPHONY_BOT_USER_ID") {
            self.bot.user_id = val;
        }
        if let Ok(val) = std::env::var("SYMPHONY_BOT_DISPLAY_NAME") {
            self.bot.display_name = Some(val);
        }
        if let Ok(val) = std::env::var("SYMPHONY_DATAFEED_MAX_BATCH_SIZE") {
            self.datafeed.max_batch_size = val.parse().with_context(|| {
                format!(
                    "SYMPHONY_DATAFEED_MAX_BATCH_SIZE must be a positive integer, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("SYMPHONY_DATAFEED_READ_TIMEOUT_SECS") {
            self.datafeed.read_timeout_secs = val.parse().with_context(|| {
                format!(
                    "SYMPHONY_DATAFEED_READ_TIMEOUT_SECS must be a number of seconds, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("SYMPHONY_DATAFEED_MAX_RETRIES") {
            self.datafeed.max_retries = val.parse().with_context(|| {
                format!("SYMPHONY_DATAFEED_MAX_RETRIES must be an integer, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("SYMPHONY_PROMETHEUS_ADDR") {
            self.metrics.prometheus_addr = Some(val);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.bot.user_id.trim().is_empty() {
            anyhow::bail!(
                "bot.user_id is required (set in config.toml or SYMPHONY_BOT_USER_ID env var)"
            );
        }
        if self.datafeed.max_batch_size == 0 {
            anyhow::bail!("datafeed.max_batch_size must be at least 1");
        }
        if self.datafeed.backoff_multiplier == 0 {
            anyhow::bail!("datafeed.backoff_multiplier must be at least 1");
        }
        if self.datafeed.backoff_initial_ms > self.datafeed.backoff_max_ms {
            anyhow::bail!(
                "datafeed.backoff_initial_ms ({}) exceeds datafeed.backoff_max_ms ({})",
                self.datafeed.backoff_initial_ms,
                self.datafeed.backoff_max_ms
            );
        }
        Ok(())
    }
}

/// Config path: `SYMPHONY_CONFIG_PATH`, else `./config.toml` if present, else the
/// platform config directory.
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SYMPHONY_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let local = PathBuf::from("config.toml");
    if local.exists() {
        return local;
    }
    crate::paths::config_file()
}
