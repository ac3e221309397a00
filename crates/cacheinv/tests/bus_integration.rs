//! End-to-end bus behaviour over the in-process broker.
//!
//! Each test wires one or more buses to a shared `MemoryBroker`, the same
//! way several processes would share one Redis server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cacheinv::connection;
use cacheinv::transport::{Connector, MessageHandler, ServerEndpoint};
use cacheinv::{
    InvalidationBus, InvalidationError, InvalidationResult, InvalidationSettings, InvalidationStrategy, LocalCache,
    MemoryBroker, MemoryCache, Transport,
};
use parking_lot::Mutex;

fn owned_bus(broker: &MemoryBroker, settings: InvalidationSettings) -> InvalidationBus {
    let connection = connection::from_connector(Arc::new(broker.connector()), &settings);
    InvalidationBus::new(connection, settings)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_dependency_key_evicts_dependent_items() {
    let broker = MemoryBroker::new();
    let cache = Arc::new(MemoryCache::new("consumer"));
    let consumer = owned_bus(&broker, InvalidationSettings::new().with_target_cache(cache.clone()));
    let producer = owned_bus(&broker, InvalidationSettings::new().without_target_cache());
    consumer.start().await;
    producer.start().await;

    let first = consumer.create_change_monitor("dep-key");
    let second = consumer.create_change_monitor("dep-key");
    assert!(cache.set_with_dependencies("item1", b"one".to_vec(), None, vec![first]));
    assert!(cache.set_with_dependencies("item2", b"two".to_vec(), None, vec![second]));

    let receivers = producer.invalidate("dep-key").await;

    assert_eq!(receivers, 2);
    assert!(wait_until(|| !cache.contains("item1") && !cache.contains("item2")).await);
    assert_eq!(consumer.notifier().topic_count(), 0);
}

#[tokio::test]
async fn test_remove_strategy_only_touches_cache() {
    let broker = MemoryBroker::new();
    let cache = Arc::new(MemoryCache::new("consumer"));
    let callbacks = Arc::new(AtomicU32::new(0));
    let counter = callbacks.clone();
    let bus = owned_bus(
        &broker,
        InvalidationSettings::new()
            .with_strategy(InvalidationStrategy::REMOVE_FROM_LOCAL_CACHE)
            .with_target_cache(cache.clone())
            .with_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );
    bus.start().await;
    cache.set("product:1", b"v".to_vec(), None);
    cache.set("keep", b"v".to_vec(), None);
    let token = bus.create_change_monitor("product:1");

    assert_eq!(bus.invalidate("product:1").await, 1);

    assert!(wait_until(|| !cache.contains("product:1")).await);
    assert!(cache.contains("keep"));
    assert!(!token.is_expired());
    assert_eq!(callbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_callback_strategy_receives_topic() {
    let broker = MemoryBroker::new();
    let topics = Arc::new(Mutex::new(Vec::new()));
    let sink = topics.clone();
    let bus = owned_bus(
        &broker,
        InvalidationSettings::new()
            .with_strategy(InvalidationStrategy::INVOKE_EXTERNAL_CALLBACK)
            .without_target_cache()
            .with_callback(move |topic| sink.lock().push(topic.to_string())),
    );
    bus.start().await;

    bus.invalidate("orders").await;
    bus.invalidate("customers").await;

    assert!(wait_until(|| topics.lock().len() == 2).await);
    assert_eq!(*topics.lock(), vec!["orders".to_string(), "customers".to_string()]);
}

#[tokio::test]
async fn test_keyspace_events_are_processed_when_enabled() {
    let broker = MemoryBroker::new();
    let cache = Arc::new(MemoryCache::new("consumer"));
    let bus = owned_bus(
        &broker,
        InvalidationSettings::new()
            .with_target_cache(cache.clone())
            .with_keyspace_notifications(true),
    );
    bus.start().await;
    cache.set("user:1", b"v".to_vec(), None);
    cache.set("user:2", b"v".to_vec(), None);

    assert_eq!(broker.publish("__keyspace@0__:user:2", "del"), 0);
    assert_eq!(broker.publish("__keyevent@0__:del", "user:1"), 1);

    assert!(wait_until(|| !cache.contains("user:1")).await);
    assert!(cache.contains("user:2"));
}

#[tokio::test]
async fn test_keyspace_events_ignored_when_disabled() {
    let broker = MemoryBroker::new();
    let cache = Arc::new(MemoryCache::new("consumer"));
    let bus = owned_bus(&broker, InvalidationSettings::new().with_target_cache(cache.clone()));
    bus.start().await;
    cache.set("user:1", b"v".to_vec(), None);

    assert_eq!(broker.publish("__keyevent@0__:del", "user:1"), 0);
    assert_eq!(broker.subscription_count(), 1);
    assert!(cache.contains("user:1"));
}

#[tokio::test]
async fn test_unavailable_broker_degrades_to_zero() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let bus = owned_bus(&broker, InvalidationSettings::new());

    bus.start().await;

    assert!(!bus.is_connected());
    assert_eq!(bus.invalidate("x").await, 0);
    assert!(bus.create_change_monitor("x").is_expired());
    assert!(bus.connection().get_config().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_redis_address() {
    let settings = InvalidationSettings::new().with_connect_timeout(Duration::from_millis(500));
    let bus = InvalidationBus::from_address("127.0.0.1:1", settings);

    bus.start().await;

    assert!(!bus.is_connected());
    assert_eq!(bus.invalidate("x").await, 0);
}

#[tokio::test]
async fn test_stop_unsubscribes() {
    let broker = MemoryBroker::new();
    let bus = owned_bus(
        &broker,
        InvalidationSettings::new().with_keyspace_notifications(true),
    );
    bus.start().await;
    assert_eq!(broker.subscription_count(), 2);

    bus.stop().await;

    assert_eq!(broker.subscription_count(), 0);
    assert!(!bus.is_connected());
}

#[tokio::test]
async fn test_shared_transport_survives_stop() {
    let broker = MemoryBroker::new();
    let transport = broker.transport();
    let bus = InvalidationBus::from_transport(transport.clone(), InvalidationSettings::new());
    bus.start().await;

    bus.stop().await;

    assert!(!transport.is_closed());
    assert!(transport.is_connected());
    assert_eq!(transport.publish("invalidate", "x").await.unwrap(), 0);
}

#[tokio::test]
async fn test_panicking_callback_does_not_block_other_actions() {
    let broker = MemoryBroker::new();
    let cache = Arc::new(MemoryCache::new("consumer"));
    let bus = owned_bus(
        &broker,
        InvalidationSettings::new()
            .with_target_cache(cache.clone())
            .with_callback(|topic| panic!("callback failed for {topic}")),
    );
    bus.start().await;
    cache.set("a", b"v".to_vec(), None);
    cache.set("b", b"v".to_vec(), None);
    let token = bus.create_change_monitor("a");

    bus.invalidate("a").await;
    bus.invalidate("b").await;

    assert!(wait_until(|| !cache.contains("a") && !cache.contains("b")).await);
    assert!(token.has_changed());
}

/// Transport that reports connectivity from its last command, the way the
/// Redis transport does. The first `failures` publishes fail, and every
/// command fails while `reachable` is off.
struct FlakyTransport {
    failures: u32,
    reachable: AtomicBool,
    connected: AtomicBool,
    publishes: AtomicU32,
    subscriptions: AtomicU32,
}

impl FlakyTransport {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            publishes: AtomicU32::new(0),
            subscriptions: AtomicU32::new(0),
        })
    }

    fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn outcome<T>(&self, value: T) -> InvalidationResult<T> {
        let reachable = self.reachable.load(Ordering::SeqCst);
        self.connected.store(reachable, Ordering::SeqCst);
        if reachable {
            Ok(value)
        } else {
            Err(InvalidationError::Connection("connection refused".into()))
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> InvalidationResult<()> {
        self.outcome(())
    }

    async fn subscribe(&self, _channel: &str, _handler: MessageHandler) -> InvalidationResult<()> {
        self.outcome(())?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe_all(&self) -> InvalidationResult<()> {
        Ok(())
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> InvalidationResult<u64> {
        let attempt = self.publishes.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            self.connected.store(false, Ordering::SeqCst);
            return Err(InvalidationError::Publish(format!("transient failure {attempt}")));
        }
        self.outcome(1)
    }

    async fn servers(&self) -> InvalidationResult<Vec<ServerEndpoint>> {
        self.outcome(vec![ServerEndpoint::primary("flaky:6379")])
    }

    async fn config_get(&self, _server: &ServerEndpoint) -> InvalidationResult<Vec<(String, String)>> {
        self.outcome(Vec::new())
    }

    async fn close(&self) {}
}

/// Hands out the same [`FlakyTransport`] on every open.
struct FlakyConnector {
    transport: Arc<FlakyTransport>,
}

#[async_trait]
impl Connector for FlakyConnector {
    fn address(&self) -> &str {
        "flaky:6379"
    }

    async fn open(&self) -> InvalidationResult<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = self.transport.clone();
        Ok(transport)
    }
}

#[tokio::test(start_paused = true)]
async fn test_resilient_publish_retries_transient_failures() {
    let transport = FlakyTransport::new(2);
    let settings = InvalidationSettings::new()
        .with_resilience(true)
        .with_retry(3, Duration::from_millis(10), true);
    let bus = InvalidationBus::from_transport(transport.clone(), settings);

    let started = tokio::time::Instant::now();
    let receivers = bus.invalidate("x").await;

    assert_eq!(receivers, 1);
    assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_resilient_publish_gives_up_with_zero() {
    let transport = FlakyTransport::new(u32::MAX);
    let settings = InvalidationSettings::new()
        .with_resilience(true)
        .with_retry(2, Duration::from_millis(10), false);
    let bus = InvalidationBus::from_transport(transport.clone(), settings);

    assert_eq!(bus.invalidate("x").await, 0);
    assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_without_resilience_publish_error_is_zero() {
    let transport = FlakyTransport::new(1);
    let bus = InvalidationBus::from_transport(transport.clone(), InvalidationSettings::new());

    assert_eq!(bus.invalidate("x").await, 0);
    assert_eq!(bus.invalidate("x").await, 1);
}

#[tokio::test]
async fn test_resilient_health_events() {
    let broker = MemoryBroker::new();
    let settings = InvalidationSettings::new()
        .with_resilience(true)
        .with_health_check_interval(Duration::from_secs(60));
    let bus = InvalidationBus::from_transport(broker.transport(), settings);
    let monitor = bus.connection().health_monitor().expect("resilient connection");
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    monitor.on_health_changed(Arc::new(move |healthy| sink.lock().push(healthy)));

    broker.set_available(false);
    monitor.perform_health_check().await;
    monitor.perform_health_check().await;
    assert_eq!(bus.invalidate("x").await, 0);

    broker.set_available(true);
    monitor.perform_health_check().await;

    assert_eq!(*events.lock(), vec![false, true]);
    assert!(monitor.is_healthy());
}

#[tokio::test]
async fn test_publish_recovers_after_outage() {
    let transport = FlakyTransport::new(0);
    let bus = InvalidationBus::from_transport(transport.clone(), InvalidationSettings::new());
    bus.start().await;
    assert_eq!(bus.invalidate("x").await, 1);

    transport.set_reachable(false);
    assert_eq!(bus.invalidate("x").await, 0);
    assert!(!bus.is_connected());
    assert!(bus.create_change_monitor("x").is_expired());

    transport.set_reachable(true);
    assert_eq!(bus.invalidate("x").await, 1);
    assert!(bus.is_connected());
    assert!(!bus.create_change_monitor("x").is_expired());
    assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_restart_after_outage_resubscribes() {
    let transport = FlakyTransport::new(0);
    let settings = InvalidationSettings::new();
    let connection = connection::from_connector(
        Arc::new(FlakyConnector {
            transport: transport.clone(),
        }),
        &settings,
    );
    let bus = InvalidationBus::new(connection, settings);
    bus.start().await;
    assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 1);

    transport.set_reachable(false);
    assert_eq!(bus.invalidate("x").await, 0);
    assert!(!bus.connection().connect().await);

    transport.set_reachable(true);
    bus.stop().await;
    bus.start().await;

    assert!(bus.is_connected());
    assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 2);
    assert_eq!(bus.invalidate("x").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resilient_retry_reaches_transport_after_connection_failure() {
    let transport = FlakyTransport::new(0);
    let settings = InvalidationSettings::new()
        .with_resilience(true)
        .with_health_check_interval(Duration::from_secs(3600))
        .with_retry(3, Duration::from_millis(10), false);
    let bus = InvalidationBus::from_transport(transport.clone(), settings);
    bus.start().await;

    transport.set_reachable(false);
    let outage = bus.invalidate("x");
    let restore = async {
        tokio::time::sleep(Duration::from_millis(15)).await;
        transport.set_reachable(true);
    };
    let (receivers, ()) = tokio::join!(outage, restore);

    assert_eq!(receivers, 1);
    assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
    assert!(bus.is_connected());
}

#[tokio::test]
async fn test_resilient_bus_restarts_healthy_after_outage() {
    let broker = MemoryBroker::new();
    let settings = InvalidationSettings::new()
        .with_resilience(true)
        .with_health_check_interval(Duration::from_secs(3600));
    let bus = InvalidationBus::from_transport(broker.transport(), settings);
    let monitor = bus.connection().health_monitor().expect("resilient connection");
    broker.set_available(false);
    assert!(!monitor.perform_health_check().await);
    broker.set_available(true);

    bus.start().await;

    assert!(monitor.is_healthy());
    assert_eq!(broker.subscription_count(), 1);
    assert_eq!(bus.invalidate("x").await, 1);

    bus.stop().await;
    assert!(!monitor.is_healthy());
    assert_eq!(broker.subscription_count(), 0);
}
