//! Cross-process cache invalidation over Redis pub/sub.
//!
//! Every process runs an [`InvalidationBus`] subscribed to the `invalidate`
//! channel. Publishing a topic reaches all of them, and each applies its
//! configured [`InvalidationStrategy`]: fire in-process dependency tokens,
//! drop the key from a local cache, and call a host callback.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cacheinv::{InvalidationManager, InvalidationSettings, MemoryCache};
//!
//! # async fn run() {
//! let cache = Arc::new(MemoryCache::new("products"));
//! InvalidationManager::configure("localhost:6379", InvalidationSettings::new().with_target_cache(cache.clone())).await;
//!
//! let token = InvalidationManager::create_change_monitor("catalog");
//! cache.set_with_dependencies("product:1", b"...".to_vec(), None, vec![token]);
//!
//! // In any process: evicts product:1 everywhere.
//! InvalidationManager::invalidate("catalog").await;
//! # }
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod manager;
pub mod notification;
pub mod retry;
pub mod settings;
pub mod strategy;
pub mod transport;

pub use bus::{DEFAULT_INVALIDATION_CHANNEL, DEFAULT_KEYSPACE_CHANNEL, InvalidationBus};
pub use cache::{LocalCache, MemoryCache};
pub use config::InvalidationConfig;
pub use connection::{Connection, ConnectionState, HealthMonitor};
pub use error::{InvalidationError, InvalidationResult};
pub use manager::InvalidationManager;
pub use notification::{DependencyToken, TokenState, TopicNotificationManager};
pub use retry::{Backoff, RetryExecutor};
pub use settings::{InvalidationCallback, InvalidationSettings};
pub use strategy::InvalidationStrategy;
pub use transport::{MemoryBroker, Transport};
