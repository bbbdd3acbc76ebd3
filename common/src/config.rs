use sea_orm::ConnectOptions;
use serde::Deserialize;
use std::{error::Error, fs, time::Duration};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

/// Connection pool settings handed to SeaORM's `ConnectOptions`.
///
/// In-memory SQLite needs a single connection: every pooled connection would
/// otherwise see its own empty database.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 {
    1
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl PoolConfig {
    pub fn connect_options(&self, database_url: &str) -> ConnectOptions {
        let mut options = ConnectOptions::new(database_url.to_owned());
        options
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .sqlx_logging(self.sqlx_logging);
        options
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            sqlx_logging: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TestContextConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TestContextConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(default)]
    pub test_context: TestContextConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config = serde_yml::from_str(contents)?;

        Ok(config)
    }
}
