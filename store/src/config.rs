//! Storage backend configuration types.

use serde::{Deserialize, Serialize};
use url::Url;

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// Storage section of the application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            StorageBackend::Memory => Ok(()),
            StorageBackend::Postgres => self
                .postgres
                .as_ref()
                .ok_or_else(|| "postgres backend selected but no postgres section".to_string())?
                .validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresConfig {
    // Database connection URL,
    // postgres://[user[:password]@][netloc][:port][/dbname][?param1=value1&...]
    pub db_url: String,
    // Database pool max size
    #[serde(default = "PostgresConfig::default_pool_max")]
    pub pool_max: usize,
}

impl PostgresConfig {
    pub fn default_pool_max() -> usize {
        16
    }

    pub fn validate(&self) -> Result<(), String> {
        let s = self.db_url.trim();
        if s.is_empty() {
            return Err("db_url should not be empty".to_string());
        }

        let url = Url::parse(s).map_err(|e| format!("invalid db_url: {}", e))?;

        let scheme = url.scheme();
        if scheme != "postgres" && scheme != "postgresql" {
            return Err(format!("unsupported URL scheme: {}", scheme));
        }

        if url.host().is_none() {
            return Err("db_url must have a host".to_string());
        }

        let dbname = url.path().strip_prefix('/').filter(|p| !p.is_empty());
        if dbname.is_none() {
            return Err("db_url must name a database".to_string());
        }

        if self.pool_max == 0 {
            return Err("pool_max must be greater than 0, default is 16".to_string());
        }

        Ok(())
    }
}
