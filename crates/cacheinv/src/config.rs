//! File and environment configuration.
//!
//! ```toml
//! # cacheinv.toml
//! redis_url = "redis://localhost:6379"
//! strategy = ["notify_dependents", "remove_from_local_cache"]
//! enable_keyspace_notifications = true
//! enable_resilience = true
//! health_check_interval_ms = 10000
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `CACHEINV__REDIS_URL=redis://cache:6379` or
//! `CACHEINV__STRATEGY=notify_dependents,invoke_external_callback`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidationError, InvalidationResult};
use crate::strategy::InvalidationStrategy;

pub const DEFAULT_CONFIG_FILE: &str = "cacheinv.toml";
pub const ENV_PREFIX: &str = "CACHEINV";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvalidationConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default)]
    pub strategy: InvalidationStrategy,
    #[serde(default)]
    pub enable_keyspace_notifications: bool,
    #[serde(default)]
    pub enable_resilience: bool,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_exponential_backoff() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_pool_size() -> usize {
    10
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            strategy: InvalidationStrategy::default(),
            enable_keyspace_notifications: false,
            enable_resilience: false,
            health_check_interval_ms: default_health_check_interval_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            exponential_backoff: default_exponential_backoff(),
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_size: default_pool_size(),
        }
    }
}

impl InvalidationConfig {
    /// Load from `path` (or `cacheinv.toml` if present) plus `CACHEINV__*`
    /// environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> InvalidationResult<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut builder = Config::builder();
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(InvalidationError::Config(format!(
                "config file not found: {}",
                file.display()
            )));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("strategy"),
        );

        let merged: Self = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> InvalidationResult<()> {
        if self.redis_url.trim().is_empty() {
            return Err(InvalidationError::Config("redis_url must not be empty".into()));
        }
        if self.health_check_interval_ms == 0 {
            return Err(InvalidationError::Config(
                "health_check_interval_ms must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(InvalidationError::Config(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(InvalidationError::Config("pool_size must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = InvalidationConfig::default();
        assert_eq!(config.strategy, InvalidationStrategy::ALL);
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(config.exponential_backoff);
        assert!(!config.enable_resilience);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
redis_url = "redis://cache:6380"
strategy = ["remove_from_local_cache", "invoke_external_callback"]
enable_keyspace_notifications = true
enable_resilience = true
health_check_interval_ms = 500
"#,
        );

        let config = InvalidationConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(
            config.strategy,
            InvalidationStrategy::REMOVE_FROM_LOCAL_CACHE | InvalidationStrategy::INVOKE_EXTERNAL_CALLBACK
        );
        assert!(config.enable_keyspace_notifications);
        assert!(config.enable_resilience);
        assert_eq!(config.health_check_interval_ms, 500);
        assert_eq!(config.pool_size, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = InvalidationConfig::load(Some(Path::new("/nonexistent/cacheinv.toml")));
        assert!(matches!(result, Err(InvalidationError::Config(_))));
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let file = write_config("pool_size = 0\n");
        assert!(InvalidationConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = InvalidationConfig {
            health_check_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = InvalidationConfig {
            redis_url: "  ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
