//! Application configuration.
//!
//! Loaded from YAML, then selectively overridden from the environment:
//! - `TOOLTRACK_DATABASE_URL` switches storage to Postgres at that URL
//! - `TOOLTRACK_BOT_TOKEN` enables Telegram delivery with that token
//! - `TOOLTRACK_LOG` replaces the log filter directive

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tool_store::{PostgresConfig, StorageBackend, StorageConfig};

pub const ENV_DATABASE_URL: &str = "TOOLTRACK_DATABASE_URL";
pub const ENV_BOT_TOKEN: &str = "TOOLTRACK_BOT_TOKEN";
pub const ENV_LOG: &str = "TOOLTRACK_LOG";

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub qr: QrConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `tooltrack=debug,tool_store=info`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Notification channel
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationConfig {
    /// Messages are written to the log only
    #[default]
    Log,
    Telegram {
        bot_token: String,
        #[serde(default = "default_api_base")]
        api_base: String,
    },
}

// Leaves the bot token out of debug output.
impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationConfig::Log => f.write_str("Log"),
            NotificationConfig::Telegram { api_base, .. } => f
                .debug_struct("Telegram")
                .field("api_base", api_base)
                .finish_non_exhaustive(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QrConfig {
    #[serde(default)]
    pub case_insensitive: bool,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(db_url) = lookup(ENV_DATABASE_URL) {
            let pool_max = self
                .storage
                .postgres
                .as_ref()
                .map(|pg| pg.pool_max)
                .unwrap_or_else(PostgresConfig::default_pool_max);
            self.storage.backend = StorageBackend::Postgres;
            self.storage.postgres = Some(PostgresConfig { db_url, pool_max });
        }

        if let Some(token) = lookup(ENV_BOT_TOKEN) {
            self.notifications = match self.notifications {
                NotificationConfig::Telegram { api_base, .. } => NotificationConfig::Telegram {
                    bot_token: token,
                    api_base,
                },
                NotificationConfig::Log => NotificationConfig::Telegram {
                    bot_token: token,
                    api_base: default_api_base(),
                },
            };
        }

        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate().map_err(ConfigError::Invalid)?;

        tracing_subscriber::EnvFilter::try_new(&self.logging.level).map_err(|e| {
            ConfigError::Invalid(format!("logging.level '{}': {e}", self.logging.level))
        })?;

        if let NotificationConfig::Telegram {
            bot_token,
            api_base,
        } = &self.notifications
        {
            if bot_token.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "notifications.bot_token should not be empty".to_string(),
                ));
            }
            url::Url::parse(api_base).map_err(|e| {
                ConfigError::Invalid(format!("notifications.api_base '{api_base}': {e}"))
            })?;
        }

        if self.sessions.ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "sessions.ttl_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
