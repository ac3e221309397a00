//! In-process pub/sub broker.
//!
//! Behaves like a single Redis node for the operations the bus uses:
//! channel and pattern subscriptions, publish receiver counts, `CONFIG GET`
//! and server roles. Every transport handed out by one [`MemoryBroker`]
//! sees the others' messages, so several buses in one process can talk to
//! each other. [`MemoryBroker::set_available`] simulates an outage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace};

use super::{Connector, MessageHandler, ServerEndpoint, Transport, glob_match, is_pattern};
use crate::error::{InvalidationError, InvalidationResult};

const MEMORY_ADDRESS: &str = "memory://local";

struct BrokerSubscription {
    transport_id: u64,
    channel: String,
    pattern: bool,
    sender: mpsc::UnboundedSender<(String, String)>,
}

impl BrokerSubscription {
    fn matches(&self, channel: &str) -> bool {
        if self.pattern {
            glob_match(&self.channel, channel)
        } else {
            self.channel == channel
        }
    }
}

struct BrokerState {
    available: AtomicBool,
    next_transport: AtomicU64,
    subscriptions: Mutex<Vec<BrokerSubscription>>,
    servers: RwLock<Vec<ServerEndpoint>>,
    config: RwLock<Vec<(String, String)>>,
}

impl BrokerState {
    fn deliver(&self, channel: &str, payload: &str) -> u64 {
        let subscriptions = self.subscriptions.lock();
        let mut receivers = 0;
        for subscription in subscriptions.iter().filter(|s| s.matches(channel)) {
            if subscription
                .sender
                .send((channel.to_string(), payload.to_string()))
                .is_ok()
            {
                receivers += 1;
            }
        }
        trace!(channel = %channel, receivers, "Broker delivered message");
        receivers
    }
}

/// Shared in-process message broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                available: AtomicBool::new(true),
                next_transport: AtomicU64::new(1),
                subscriptions: Mutex::new(Vec::new()),
                servers: RwLock::new(vec![ServerEndpoint::primary(MEMORY_ADDRESS)]),
                config: RwLock::new(vec![
                    ("maxmemory-policy".to_string(), "noeviction".to_string()),
                    ("notify-keyspace-events".to_string(), String::new()),
                ]),
            }),
        }
    }

    /// A new session on this broker.
    pub fn transport(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            id: self.state.next_transport.fetch_add(1, Ordering::Relaxed),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { broker: self.clone() }
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        debug!(available, "Memory broker availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Publish from outside any transport, e.g. a keyspace event.
    pub fn publish(&self, channel: &str, payload: &str) -> u64 {
        self.state.deliver(channel, payload)
    }

    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().len()
    }

    pub fn set_servers(&self, servers: Vec<ServerEndpoint>) {
        *self.state.servers.write() = servers;
    }

    pub fn set_config(&self, key: &str, value: &str) {
        let mut config = self.state.config.write();
        match config.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => config.push((key.to_string(), value.to_string())),
        }
    }
}

/// Opens transports on a [`MemoryBroker`]. Fails while it is unavailable.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    fn address(&self) -> &str {
        MEMORY_ADDRESS
    }

    async fn open(&self) -> InvalidationResult<Arc<dyn Transport>> {
        if !self.broker.is_available() {
            return Err(InvalidationError::Connection("memory broker unavailable".into()));
        }
        Ok(self.broker.transport())
    }
}

/// One session on a [`MemoryBroker`].
pub struct MemoryTransport {
    id: u64,
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> InvalidationResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(InvalidationError::Unavailable)
        }
    }

    fn remove_subscriptions(&self) -> usize {
        let mut subscriptions = self.state.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.transport_id != self.id);
        before - subscriptions.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        !self.is_closed() && self.state.available.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> InvalidationResult<()> {
        self.ensure_connected()
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> InvalidationResult<()> {
        self.ensure_connected()?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<(String, String)>();
        let delivery = async move {
            while let Some((channel, payload)) = receiver.recv().await {
                handler(&channel, &payload);
            }
        };
        tokio::spawn(delivery.with_current_subscriber());

        self.state.subscriptions.lock().push(BrokerSubscription {
            transport_id: self.id,
            channel: channel.to_string(),
            pattern: is_pattern(channel),
            sender,
        });
        Ok(())
    }

    async fn unsubscribe_all(&self) -> InvalidationResult<()> {
        // Dropping the senders ends the delivery tasks once drained.
        let removed = self.remove_subscriptions();
        trace!(transport = self.id, removed, "Memory transport unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> InvalidationResult<u64> {
        self.ensure_connected()?;
        Ok(self.state.deliver(channel, payload))
    }

    async fn servers(&self) -> InvalidationResult<Vec<ServerEndpoint>> {
        self.ensure_connected()?;
        Ok(self.state.servers.read().clone())
    }

    async fn config_get(&self, _server: &ServerEndpoint) -> InvalidationResult<Vec<(String, String)>> {
        self.ensure_connected()?;
        Ok(self.state.config.read().clone())
    }

    async fn close(&self) {
        self.remove_subscriptions();
        self.closed.store(true, Ordering::SeqCst);
    }
}
