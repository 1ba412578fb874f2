use std::time::Duration;
use thiserror::Error;

const DEFAULT_DB_POOL_SIZE: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for DB_POOL_SIZE: {0}")]
    InvalidPoolSize(String),

    #[error("Invalid value for OPERATION_TIMEOUT_MS: {0}")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_url: String,
    /// Default: 8
    pub db_pool_size: usize,
    /// Per-operation deadline. Unset means operations only stop on shutdown.
    pub operation_timeout: Option<Duration>,
}

impl Config {
    /// Resolves config from an arbitrary key lookup. The binary passes the process environment
    /// with CLI overrides layered on top.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let db_pool_size = match lookup("DB_POOL_SIZE") {
            Some(val) => parse_pool_size(&val)?,
            None => DEFAULT_DB_POOL_SIZE,
        };

        let operation_timeout = match lookup("OPERATION_TIMEOUT_MS") {
            Some(val) => Some(parse_timeout_ms(&val)?),
            None => None,
        };

        Ok(Self {
            db_url,
            db_pool_size,
            operation_timeout,
        })
    }
}

pub fn parse_pool_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::InvalidPoolSize(raw.to_string())),
    }
}

pub fn parse_timeout_ms(raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidTimeout(raw.to_string())),
    }
}
