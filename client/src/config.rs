//! Configuration management for the sync client.

use schoolsync_engine::{DEFAULT_MAX_RETRIES, MAX_BATCH_SIZE};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote document store, e.g. `http://localhost:3000`
    pub remote_url: String,
    /// Directory holding the local key-value files
    pub data_dir: PathBuf,
    /// Period of the background flush
    pub sync_interval: Duration,
    /// Failed attempts before a queued operation is dropped
    pub max_retries: u32,
    /// Writes per remote commit
    pub batch_size: usize,
    /// Bearer token for the remote store
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://localhost:3000".to_string(),
            data_dir: PathBuf::from("./.schoolsync"),
            sync_interval: Duration::from_secs(30),
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: MAX_BATCH_SIZE,
            auth_token: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let remote_url = lookup("SCHOOLSYNC_REMOTE_URL").ok_or(ConfigError::MissingRemoteUrl)?;
        let remote_url = remote_url.trim_end_matches('/').to_string();
        if !(remote_url.starts_with("http://") || remote_url.starts_with("https://")) {
            return Err(ConfigError::InvalidRemoteUrl(remote_url));
        }

        let data_dir = lookup("SCHOOLSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let sync_interval = match lookup("SCHOOLSYNC_SYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SCHOOLSYNC_SYNC_INTERVAL_SECS"))?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue("SCHOOLSYNC_SYNC_INTERVAL_SECS"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.sync_interval,
        };

        let max_retries = match lookup("SCHOOLSYNC_MAX_RETRIES") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SCHOOLSYNC_MAX_RETRIES"))?,
            None => defaults.max_retries,
        };

        let batch_size = match lookup("SCHOOLSYNC_BATCH_SIZE") {
            Some(raw) => {
                let size: usize = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SCHOOLSYNC_BATCH_SIZE"))?;
                if size == 0 || size > MAX_BATCH_SIZE {
                    return Err(ConfigError::InvalidValue("SCHOOLSYNC_BATCH_SIZE"));
                }
                size
            }
            None => defaults.batch_size,
        };

        let auth_token = lookup("SCHOOLSYNC_AUTH_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            remote_url,
            data_dir,
            sync_interval,
            max_retries,
            batch_size,
            auth_token,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SCHOOLSYNC_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("SCHOOLSYNC_REMOTE_URL must be an http(s) URL, got {0:?}")]
    InvalidRemoteUrl(String),

    #[error("Invalid {0} value")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config =
            ClientConfig::from_lookup(lookup(&[("SCHOOLSYNC_REMOTE_URL", "http://sync.local/")]))
                .unwrap();
        assert_eq!(config.remote_url, "http://sync.local");
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.data_dir, PathBuf::from("./.schoolsync"));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SCHOOLSYNC_REMOTE_URL", "https://sync.example.org"),
            ("SCHOOLSYNC_DATA_DIR", "/var/lib/schoolsync"),
            ("SCHOOLSYNC_SYNC_INTERVAL_SECS", "5"),
            ("SCHOOLSYNC_MAX_RETRIES", "0"),
            ("SCHOOLSYNC_BATCH_SIZE", "50"),
            ("SCHOOLSYNC_AUTH_TOKEN", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_url() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingRemoteUrl)
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            ("SCHOOLSYNC_SYNC_INTERVAL_SECS", "0"),
            ("SCHOOLSYNC_SYNC_INTERVAL_SECS", "soon"),
            ("SCHOOLSYNC_BATCH_SIZE", "501"),
            ("SCHOOLSYNC_MAX_RETRIES", "-1"),
        ];
        for (key, value) in bad {
            let result = ClientConfig::from_lookup(lookup(&[
                ("SCHOOLSYNC_REMOTE_URL", "http://sync.local"),
                (key, value),
            ]));
            assert!(result.is_err(), "{key}={value} accepted");
        }

        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("SCHOOLSYNC_REMOTE_URL", "ftp://x")])),
            Err(ConfigError::InvalidRemoteUrl(_))
        ));
    }
}
