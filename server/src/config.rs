//! Configuration management for the server.

use schoolsync_engine::MAX_BATCH_SIZE;
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared bearer token; when unset, requests are anonymous
    pub auth_secret: Option<String>,
    /// Largest accepted batch commit
    pub max_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let max_batch_size = match env::var("MAX_BATCH_SIZE") {
            Ok(raw) => parse_batch_size(&raw)?,
            Err(_) => MAX_BATCH_SIZE,
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            max_batch_size,
        })
    }
}

fn parse_batch_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidMaxBatchSize),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid MAX_BATCH_SIZE value")]
    InvalidMaxBatchSize,
}
