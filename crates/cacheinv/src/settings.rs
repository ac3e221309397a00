//! Per-bus settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::Dispatch;

use crate::cache::{LocalCache, MemoryCache};
use crate::config::InvalidationConfig;
use crate::retry::{Backoff, RetryExecutor};
use crate::strategy::InvalidationStrategy;
use crate::transport::redis::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_SIZE};

/// Host callback invoked with each inbound topic.
pub type InvalidationCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct InvalidationSettings {
    pub invalidation_strategy: InvalidationStrategy,
    /// Cache whose keys are removed under `REMOVE_FROM_LOCAL_CACHE`.
    pub target_cache: Option<Arc<dyn LocalCache>>,
    /// Also treat `__keyevent*__:*` messages as invalidations.
    pub enable_keyspace_notifications: bool,
    pub invalidation_callback: Option<InvalidationCallback>,
    /// Health polling plus publish retries.
    pub enable_resilience: bool,
    pub health_check_interval: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
    pub connect_timeout: Duration,
    pub pool_size: usize,
    /// Scoped dispatcher for the bus's log events.
    pub logger: Option<Dispatch>,
}

impl Default for InvalidationSettings {
    fn default() -> Self {
        Self {
            invalidation_strategy: InvalidationStrategy::ALL,
            target_cache: Some(MemoryCache::shared_default()),
            enable_keyspace_notifications: false,
            invalidation_callback: None,
            enable_resilience: false,
            health_check_interval: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            exponential_backoff: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
            logger: None,
        }
    }
}

impl InvalidationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &InvalidationConfig) -> Self {
        Self {
            invalidation_strategy: config.strategy,
            enable_keyspace_notifications: config.enable_keyspace_notifications,
            enable_resilience: config.enable_resilience,
            health_check_interval: config.health_check_interval(),
            max_retry_attempts: config.max_retry_attempts,
            retry_delay: config.retry_delay(),
            exponential_backoff: config.exponential_backoff,
            connect_timeout: config.connect_timeout(),
            pool_size: config.pool_size,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.invalidation_strategy = strategy;
        self
    }

    pub fn with_target_cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.target_cache = Some(cache);
        self
    }

    pub fn without_target_cache(mut self) -> Self {
        self.target_cache = None;
        self
    }

    pub fn with_keyspace_notifications(mut self, enabled: bool) -> Self {
        self.enable_keyspace_notifications = enabled;
        self
    }

    pub fn with_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.invalidation_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_resilience(mut self, enabled: bool) -> Self {
        self.enable_resilience = enabled;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay: Duration, exponential: bool) -> Self {
        self.max_retry_attempts = max_attempts;
        self.retry_delay = delay;
        self.exponential_backoff = exponential;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn retry_executor(&self) -> RetryExecutor {
        let backoff = if self.exponential_backoff {
            Backoff::Exponential
        } else {
            Backoff::Fixed
        };
        RetryExecutor::new(self.max_retry_attempts, self.retry_delay, backoff)
    }
}

impl fmt::Debug for InvalidationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationSettings")
            .field("invalidation_strategy", &self.invalidation_strategy)
            .field("target_cache", &self.target_cache.is_some())
            .field("enable_keyspace_notifications", &self.enable_keyspace_notifications)
            .field("invalidation_callback", &self.invalidation_callback.is_some())
            .field("enable_resilience", &self.enable_resilience)
            .field("health_check_interval", &self.health_check_interval)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_size", &self.pool_size)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = InvalidationSettings::default();
        assert_eq!(settings.invalidation_strategy, InvalidationStrategy::ALL);
        assert!(settings.target_cache.is_some());
        assert!(!settings.enable_keyspace_notifications);
        assert!(settings.invalidation_callback.is_none());
        assert!(!settings.enable_resilience);
        assert_eq!(settings.health_check_interval, Duration::from_millis(30_000));
        assert_eq!(settings.max_retry_attempts, 3);
        assert_eq!(settings.retry_delay, Duration::from_millis(1_000));
        assert!(settings.exponential_backoff);
        assert!(settings.logger.is_none());
    }

    #[test]
    fn test_from_config() {
        let config = InvalidationConfig {
            strategy: InvalidationStrategy::NOTIFY_DEPENDENTS,
            enable_resilience: true,
            retry_delay_ms: 50,
            exponential_backoff: false,
            ..Default::default()
        };
        let settings = InvalidationSettings::from_config(&config);

        assert_eq!(settings.invalidation_strategy, InvalidationStrategy::NOTIFY_DEPENDENTS);
        assert!(settings.enable_resilience);
        assert_eq!(settings.retry_executor().delay_for(3), Duration::from_millis(50));
    }

    #[test]
    fn test_builder() {
        let settings = InvalidationSettings::new()
            .with_strategy(InvalidationStrategy::INVOKE_EXTERNAL_CALLBACK)
            .without_target_cache()
            .with_callback(|_| {})
            .with_keyspace_notifications(true)
            .with_retry(5, Duration::from_millis(10), true);

        assert!(settings.target_cache.is_none());
        assert!(settings.invalidation_callback.is_some());
        assert!(settings.enable_keyspace_notifications);
        assert_eq!(settings.retry_executor().max_retries(), 5);
        assert_eq!(settings.retry_executor().delay_for(2), Duration::from_millis(40));
    }
}
