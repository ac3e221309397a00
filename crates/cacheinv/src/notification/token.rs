//! Per-cache-entry dependency on an invalidation topic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::manager::{NotificationObserver, Notifier, Subscription};

const ACTIVE: u8 = 0;
const TRIGGERED: u8 = 1;
const DISPOSED: u8 = 2;

/// Lifecycle of a [`DependencyToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Subscribed and watching its topic.
    Active,
    /// The topic fired; the eviction hook is running.
    Triggered,
    /// Unsubscribed. Terminal.
    Disposed,
}

type EvictionHook = Box<dyn FnOnce(&str) + Send>;

/// Bridges one topic subscription to a host cache entry's eviction.
///
/// The token subscribes itself on creation. When its topic is notified it
/// runs the eviction hook installed with [`DependencyToken::attach`] and
/// disposes itself. The hook runs at most once; disposal is idempotent and
/// always releases the subscription, whoever triggers it.
pub struct DependencyToken {
    topic: String,
    unique_id: String,
    state: AtomicU8,
    changed: AtomicBool,
    hook: Mutex<Option<EvictionHook>>,
    subscription: Mutex<Option<Subscription>>,
}

impl DependencyToken {
    /// Create a token watching `topic` on `notifier`.
    ///
    /// If the subscription cannot be made the token is returned already
    /// disposed, so a host cache never keeps a value it believes is watched.
    pub fn new(notifier: &dyn Notifier, topic: impl Into<String>) -> Arc<Self> {
        let token = Arc::new(Self::with_state(topic.into(), ACTIVE));
        let observer: Arc<dyn NotificationObserver> = token.clone();

        match notifier.subscribe(&token.topic, observer) {
            Ok(subscription) => {
                *token.subscription.lock() = Some(subscription);
                // The topic may have fired before the handle was stored.
                if token.state() != TokenState::Active {
                    token.release_subscription();
                }
                trace!(topic = %token.topic, id = %token.unique_id, "Dependency token created");
            }
            Err(e) => {
                warn!(
                    topic = %token.topic,
                    error = %e,
                    "Dependency token could not subscribe, created expired"
                );
                token.state.store(DISPOSED, Ordering::SeqCst);
            }
        }

        token
    }

    /// A token that is disposed from the start.
    pub fn expired(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_state(topic.into(), DISPOSED))
    }

    fn with_state(topic: String, state: u8) -> Self {
        Self {
            topic,
            unique_id: uuid::Uuid::new_v4().simple().to_string(),
            state: AtomicU8::new(state),
            changed: AtomicBool::new(false),
            hook: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn state(&self) -> TokenState {
        match self.state.load(Ordering::SeqCst) {
            ACTIVE => TokenState::Active,
            TRIGGERED => TokenState::Triggered,
            _ => TokenState::Disposed,
        }
    }

    /// True once the token no longer watches its topic.
    pub fn is_expired(&self) -> bool {
        self.state() != TokenState::Active
    }

    /// True if the topic fired for this token.
    pub fn has_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Install the host eviction hook.
    ///
    /// If the token has already expired the hook runs immediately.
    pub fn attach(&self, hook: impl FnOnce(&str) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
        if self.is_expired() {
            self.fire_hook();
        }
    }

    /// Stop watching the topic. Safe to call any number of times.
    pub fn dispose(&self) {
        if self.state.swap(DISPOSED, Ordering::SeqCst) != DISPOSED {
            trace!(topic = %self.topic, id = %self.unique_id, "Dependency token disposed");
        }
        self.release_subscription();
    }

    fn fire_hook(&self) {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook(&self.topic);
        }
    }

    fn release_subscription(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

impl NotificationObserver for DependencyToken {
    fn notify(&self, topic: &str) {
        if topic != self.topic {
            return;
        }
        if self
            .state
            .compare_exchange(ACTIVE, TRIGGERED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        debug!(topic = %self.topic, id = %self.unique_id, "Dependency changed");
        self.changed.store(true, Ordering::SeqCst);
        self.fire_hook();
        self.dispose();
    }
}

impl std::fmt::Debug for DependencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyToken")
            .field("topic", &self.topic)
            .field("unique_id", &self.unique_id)
            .field("state", &self.state())
            .finish()
    }
}
