//! The invalidation bus.
//!
//! ```text
//! invalidate("dep-key") ──► PUBLISH invalidate "dep-key"
//!                                     │
//!        every subscribed process ◄───┘
//!                 │
//!                 ├─ NOTIFY_DEPENDENTS        ──► TopicNotificationManager ──► tokens evict entries
//!                 ├─ REMOVE_FROM_LOCAL_CACHE  ──► target_cache.remove("dep-key")
//!                 └─ INVOKE_EXTERNAL_CALLBACK ──► callback("dep-key")
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{Dispatch, debug, error, info, trace, warn};

use crate::cache::LocalCache;
use crate::connection::{self, Connection};
use crate::logging;
use crate::notification::{DependencyToken, TopicNotificationManager};
use crate::settings::{InvalidationCallback, InvalidationSettings};
use crate::strategy::InvalidationStrategy;
use crate::transport::{MessageHandler, Transport};

pub const DEFAULT_INVALIDATION_CHANNEL: &str = "invalidate";
pub const DEFAULT_KEYSPACE_CHANNEL: &str = "__keyevent*__:*";
pub const KEYEVENT_PREFIX: &str = "__keyevent";

/// Applies the strategy set to inbound topics. Shared with transport handlers.
struct MessageProcessor {
    strategy: InvalidationStrategy,
    target_cache: Option<Arc<dyn LocalCache>>,
    callback: Option<InvalidationCallback>,
    notifier: Arc<TopicNotificationManager>,
    logger: Option<Dispatch>,
}

impl MessageProcessor {
    fn process(&self, topic: &str) {
        trace!(topic = %topic, strategy = %self.strategy, "Processing invalidation");

        if self.strategy.contains(InvalidationStrategy::NOTIFY_DEPENDENTS) {
            isolate("notify_dependents", topic, || self.notifier.notify(topic));
        }
        if self.strategy.contains(InvalidationStrategy::REMOVE_FROM_LOCAL_CACHE)
            && let Some(cache) = &self.target_cache
        {
            isolate("remove_from_local_cache", topic, || {
                if cache.remove(topic) {
                    debug!(topic = %topic, "Removed from local cache");
                }
            });
        }
        if self.strategy.contains(InvalidationStrategy::INVOKE_EXTERNAL_CALLBACK)
            && let Some(callback) = &self.callback
        {
            isolate("invoke_external_callback", topic, || callback(topic));
        }
    }
}

/// Run one strategy action; a panic is logged and swallowed.
fn isolate(action: &str, topic: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        error!(action, topic = %topic, panic = %panic_msg, "Invalidation action failed");
    }
}

fn is_keyevent_channel(channel: &str) -> bool {
    channel.get(..KEYEVENT_PREFIX.len()) == Some(KEYEVENT_PREFIX)
}

/// Publishes invalidations and applies inbound ones to this process.
pub struct InvalidationBus {
    settings: InvalidationSettings,
    notifier: Arc<TopicNotificationManager>,
    connection: Arc<dyn Connection>,
    processor: Arc<MessageProcessor>,
}

impl InvalidationBus {
    /// Build a bus over `connection`. Call [`InvalidationBus::start`] to subscribe.
    pub fn new(connection: Arc<dyn Connection>, settings: InvalidationSettings) -> Self {
        let notifier = Arc::new(TopicNotificationManager::new());
        let processor = Arc::new(MessageProcessor {
            strategy: settings.invalidation_strategy,
            target_cache: settings.target_cache.clone(),
            callback: settings.invalidation_callback.clone(),
            notifier: notifier.clone(),
            logger: settings.logger.clone(),
        });
        Self {
            settings,
            notifier,
            connection,
            processor,
        }
    }

    /// Bus owning a Redis session at `address`.
    pub fn from_address(address: &str, settings: InvalidationSettings) -> Self {
        let connection = connection::from_address(address, &settings);
        Self::new(connection, settings)
    }

    /// Bus reusing the caller's session. Stopping the bus never closes it.
    pub fn from_transport(transport: Arc<dyn Transport>, settings: InvalidationSettings) -> Self {
        let connection = connection::from_transport(transport, &settings);
        Self::new(connection, settings)
    }

    /// Connect and subscribe. On connection failure this logs and returns;
    /// the bus then behaves as disconnected.
    pub async fn start(&self) {
        logging::instrument(self.settings.logger.as_ref(), self.start_inner()).await
    }

    async fn start_inner(&self) {
        info!(strategy = %self.settings.invalidation_strategy, "Starting invalidation bus");
        if !self.connection.connect().await {
            error!("Failed to establish Redis connection, invalidation bus is inactive");
            return;
        }

        self.connection
            .subscribe(DEFAULT_INVALIDATION_CHANNEL, self.invalidation_handler())
            .await;
        if self.settings.enable_keyspace_notifications {
            self.connection
                .subscribe(DEFAULT_KEYSPACE_CHANNEL, self.keyspace_handler())
                .await;
        }
        info!(
            keyspace = self.settings.enable_keyspace_notifications,
            "Invalidation bus started"
        );
    }

    /// Release the connection. Disconnecting unsubscribes every channel.
    pub async fn stop(&self) {
        logging::instrument(self.settings.logger.as_ref(), async {
            self.connection.disconnect().await;
            info!("Invalidation bus stopped");
        })
        .await
    }

    fn invalidation_handler(&self) -> MessageHandler {
        let processor = self.processor.clone();
        Arc::new(move |channel: &str, topic: &str| {
            if channel != DEFAULT_INVALIDATION_CHANNEL {
                return;
            }
            logging::scoped(processor.logger.as_ref(), || processor.process(topic));
        })
    }

    fn keyspace_handler(&self) -> MessageHandler {
        let processor = self.processor.clone();
        Arc::new(move |channel: &str, key: &str| {
            if !is_keyevent_channel(channel) {
                return;
            }
            logging::scoped(processor.logger.as_ref(), || {
                trace!(channel = %channel, key = %key, "Keyspace event");
                processor.process(key)
            });
        })
    }

    /// Publish `topic` to every subscribed process, this one included.
    ///
    /// Returns the number of receivers, or 0 when disconnected or when
    /// publishing failed (after retries, if resilience is enabled).
    pub async fn invalidate(&self, topic: &str) -> u64 {
        logging::instrument(self.settings.logger.as_ref(), self.publish(topic)).await
    }

    async fn publish(&self, topic: &str) -> u64 {
        trace!(topic = %topic, "Publishing invalidation");
        let connection = &self.connection;
        if self.settings.enable_resilience {
            return self
                .settings
                .retry_executor()
                .execute_or(0, || connection.publish(DEFAULT_INVALIDATION_CHANNEL, topic))
                .await;
        }
        match connection.publish(DEFAULT_INVALIDATION_CHANNEL, topic).await {
            Ok(receivers) => receivers,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to publish invalidation");
                0
            }
        }
    }

    /// Apply the strategy set to `topic` locally, without publishing.
    pub fn process(&self, topic: &str) {
        logging::scoped(self.settings.logger.as_ref(), || self.processor.process(topic))
    }

    /// Token that fires when `topic` is invalidated.
    ///
    /// Returned already expired when the bus is not connected, so the host
    /// never caches a value nobody is watching.
    pub fn create_change_monitor(&self, topic: &str) -> Arc<DependencyToken> {
        logging::scoped(self.settings.logger.as_ref(), || {
            if !self.connection.is_connected() {
                debug!(topic = %topic, "Not connected, change monitor created expired");
                return DependencyToken::expired(topic);
            }
            DependencyToken::new(self.notifier.as_ref(), topic)
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn notifier(&self) -> &Arc<TopicNotificationManager> {
        &self.notifier
    }

    pub fn settings(&self) -> &InvalidationSettings {
        &self.settings
    }
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("connected", &self.is_connected())
            .field("settings", &self.settings)
            .finish()
    }
}
