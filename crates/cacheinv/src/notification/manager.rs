//! Topic-based observer registry.
//!
//! Observers are keyed by topic and identified by pointer: the same `Arc`
//! subscribed twice to one topic is stored once. Delivery works on a snapshot
//! of the observer list so an observer may unsubscribe itself (or others)
//! from inside its own callback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::InvalidationResult;

/// Receives notifications for the topics it subscribed to.
pub trait NotificationObserver: Send + Sync {
    fn notify(&self, topic: &str);
}

/// Subscribe/notify capability consumed by dependency tokens and the bus.
pub trait Notifier: Send + Sync {
    /// Register `observer` under `topic`.
    ///
    /// Subscribing an already registered observer is a no-op, but still
    /// yields a fresh handle; releasing any handle removes the observer.
    fn subscribe(
        &self,
        topic: &str,
        observer: Arc<dyn NotificationObserver>,
    ) -> InvalidationResult<Subscription>;

    /// Deliver `topic` to every observer currently subscribed to it.
    fn notify(&self, topic: &str);
}

type Release = Box<dyn FnOnce() + Send>;

/// Handle for one (topic, observer) registration.
///
/// `unsubscribe` is idempotent. Dropping the handle unsubscribes as well.
#[must_use = "dropping a subscription unsubscribes the observer"]
pub struct Subscription {
    release: Mutex<Option<Release>>,
}

impl Subscription {
    /// Build a handle that runs `release` once, on first unsubscribe or drop.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A handle that owns no registration.
    pub fn detached() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether this handle still holds a registration to release.
    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

type ObserverList = Vec<Arc<dyn NotificationObserver>>;

/// Thread-safe topic → observers map.
///
/// Safe under concurrent subscribe, unsubscribe and notify from any number of
/// threads without external locking.
#[derive(Default)]
pub struct TopicNotificationManager {
    subscriptions_by_topic: Arc<DashMap<String, ObserverList>>,
}

impl TopicNotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics with at least one observer.
    pub fn topic_count(&self) -> usize {
        self.subscriptions_by_topic.len()
    }

    /// Number of observers subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions_by_topic
            .get(topic)
            .map(|observers| observers.len())
            .unwrap_or(0)
    }

    /// Register `observer` under `topic` and return its release handle.
    pub fn subscribe(
        &self,
        topic: &str,
        observer: Arc<dyn NotificationObserver>,
    ) -> Subscription {
        {
            let mut observers = self
                .subscriptions_by_topic
                .entry(topic.to_string())
                .or_default();
            if !observers.iter().any(|o| same_observer(o, &observer)) {
                observers.push(Arc::clone(&observer));
            }
        }
        trace!(topic = %topic, "Observer subscribed");

        let map = Arc::downgrade(&self.subscriptions_by_topic);
        let observer = Arc::downgrade(&observer);
        let topic = topic.to_string();
        Subscription::new(move || {
            if let Some(map) = map.upgrade() {
                remove_observer(&map, &topic, &observer);
            }
        })
    }

    /// Deliver `topic` to a snapshot of its observers.
    ///
    /// A topic nobody subscribed to is a no-op and leaves no entry behind.
    /// A panicking observer is logged and does not stop delivery to the rest.
    pub fn notify(&self, topic: &str) {
        let snapshot: ObserverList = match self.subscriptions_by_topic.get(topic) {
            Some(observers) => observers.value().clone(),
            None => return,
        };

        debug!(topic = %topic, observers = snapshot.len(), "Notifying observers");

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer.notify(topic))).is_err() {
                error!(topic = %topic, "Observer panicked during notification");
            }
        }
    }
}

impl Notifier for TopicNotificationManager {
    fn subscribe(
        &self,
        topic: &str,
        observer: Arc<dyn NotificationObserver>,
    ) -> InvalidationResult<Subscription> {
        Ok(TopicNotificationManager::subscribe(self, topic, observer))
    }

    fn notify(&self, topic: &str) {
        TopicNotificationManager::notify(self, topic)
    }
}

impl std::fmt::Debug for TopicNotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicNotificationManager")
            .field("topics", &self.topic_count())
            .finish()
    }
}

fn same_observer(a: &Arc<dyn NotificationObserver>, b: &Arc<dyn NotificationObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn remove_observer(
    map: &DashMap<String, ObserverList>,
    topic: &str,
    observer: &Weak<dyn NotificationObserver>,
) {
    // Removed observers are dropped only after the shard lock is released:
    // the last strong reference may belong to the map, and an observer's own
    // drop can come back here through its subscription.
    let removed: ObserverList = match map.get_mut(topic) {
        Some(mut observers) => {
            let (removed, kept): (ObserverList, ObserverList) = std::mem::take(&mut *observers)
                .into_iter()
                .partition(|o| std::ptr::addr_eq(Arc::as_ptr(o), observer.as_ptr()));
            *observers = kept;
            removed
        }
        None => return,
    };
    map.remove_if(topic, |_, observers| observers.is_empty());

    if !removed.is_empty() {
        trace!(topic = %topic, "Observer unsubscribed");
    }
    drop(removed);
}
