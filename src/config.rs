//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::snapshot::DEFAULT_SNAPSHOT_INTERVAL;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Seconds between maintenance passes
    pub maintenance_interval_secs: u64,

    pub ledger: LedgerConfig,
}

/// Settings of the ledger core, independent of storage and transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Snapshot every N events (0 disables snapshots)
    pub snapshot_interval: i64,

    /// Replay-decide-append attempts before a conflict is surfaced
    pub max_append_attempts: u32,

    /// Base delay between attempts; attempt `n` waits `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            max_append_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let snapshot_interval = parse_or("SNAPSHOT_INTERVAL", defaults.snapshot_interval)?;
        if snapshot_interval < 0 {
            return Err(ConfigError::InvalidValue("SNAPSHOT_INTERVAL"));
        }

        let max_append_attempts = parse_or("MAX_APPEND_ATTEMPTS", defaults.max_append_attempts)?;
        if max_append_attempts == 0 {
            return Err(ConfigError::InvalidValue("MAX_APPEND_ATTEMPTS"));
        }

        let retry_backoff_ms = parse_or("RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?;

        Ok(Self {
            snapshot_interval,
            max_append_attempts,
            retry_backoff_ms,
        })
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let maintenance_interval_secs = parse_or("MAINTENANCE_INTERVAL_SECS", 60)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            maintenance_interval_secs,
            ledger: LedgerConfig::from_env()?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
