//! Redis transport: a deadpool for commands plus one pub/sub connection per
//! subscription.
//!
//! ```text
//! publish / PING / INFO / CONFIG GET ──► deadpool_redis::Pool
//! subscribe("invalidate")            ──► PubSub ──► listener task ──► handler
//! psubscribe("__keyevent*__:*")      ──► PubSub ──► listener task ──► handler
//! ```
//!
//! Listener tasks resubscribe with exponential backoff when their pub/sub
//! connection drops, so subscriptions survive a Redis restart.
//!
//! `is_connected` follows the last command or listener event. A failed
//! command never disables the transport: the next one goes back to the pool,
//! which opens fresh connections once the server answers again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::PubSub;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use super::{Connector, MessageHandler, ServerEndpoint, Transport, is_pattern};
use crate::error::{InvalidationError, InvalidationResult};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Accept both `host:port` and `redis://host:port` style addresses.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}")
    }
}

/// Opens [`RedisTransport`]s for one address.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
    pool_size: usize,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(address: &str) -> Self {
        Self {
            url: normalize_address(address),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for RedisConnector {
    fn address(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> InvalidationResult<Arc<dyn Transport>> {
        let transport = RedisTransport::connect(&self.url, self.pool_size, self.connect_timeout).await?;
        Ok(Arc::new(transport))
    }
}

/// A connected Redis session.
pub struct RedisTransport {
    url: String,
    client: redis::Client,
    pool: Pool,
    connected: Arc<AtomicBool>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisTransport {
    /// Build the pool and verify the server answers within `timeout`.
    pub async fn connect(url: &str, pool_size: usize, timeout: Duration) -> InvalidationResult<Self> {
        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url)
            .map_err(|e| InvalidationError::Connection(format!("failed to create Redis client: {e}")))?;

        let mut redis_config = deadpool_redis::Config::from_url(url);
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| InvalidationError::Pool(format!("failed to create Redis pool: {e}")))?;

        let probe = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| InvalidationError::Connection(format!("failed to connect to Redis: {e}")))?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| InvalidationError::Connection(format!("PING failed: {e}")))?;

            // Best effort.
            let name = client_name();
            let named: redis::RedisResult<()> = redis::cmd("CLIENT")
                .arg("SETNAME")
                .arg(&name)
                .query_async(&mut conn)
                .await;
            if let Err(e) = named {
                debug!(error = %e, "CLIENT SETNAME rejected");
            }
            Ok::<_, InvalidationError>(())
        };

        match tokio::time::timeout(timeout, probe).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(InvalidationError::Connection(format!(
                    "timed out after {}ms connecting to {url}",
                    timeout.as_millis()
                )));
            }
        }

        info!(url = %url, "Connected to Redis");
        Ok(Self {
            url: url.to_string(),
            client,
            pool,
            connected: Arc::new(AtomicBool::new(true)),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn command_connection(&self) -> InvalidationResult<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(InvalidationError::Pool(format!("failed to get Redis connection: {e}")))
            }
        }
    }

    /// Track connectivity from the outcome of a command.
    fn observe<T>(&self, result: redis::RedisResult<T>) -> redis::RedisResult<T> {
        match &result {
            Ok(_) => self.connected.store(true, Ordering::SeqCst),
            Err(e) if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() => {
                self.connected.store(false, Ordering::SeqCst);
            }
            Err(_) => {}
        }
        result
    }

    fn abort_listeners(&self) -> usize {
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        let count = listeners.len();
        for listener in listeners {
            listener.abort();
        }
        count
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> InvalidationResult<()> {
        let mut conn = self.command_connection().await?;
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.observe(pong)
            .map(|_| ())
            .map_err(|e| InvalidationError::Command(format!("PING failed: {e}")))
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> InvalidationResult<()> {
        let pubsub = open_pubsub(&self.client, channel)
            .await
            .map_err(|e| InvalidationError::Subscribe(format!("failed to subscribe to {channel}: {e}")))?;

        self.connected.store(true, Ordering::SeqCst);
        info!(channel = %channel, pattern = is_pattern(channel), "Subscribed to Redis channel");
        let listener = listen(
            self.client.clone(),
            channel.to_string(),
            handler,
            pubsub,
            self.connected.clone(),
        );
        let task = tokio::spawn(listener.with_current_subscriber());
        self.listeners.lock().push(task);
        Ok(())
    }

    async fn unsubscribe_all(&self) -> InvalidationResult<()> {
        let count = self.abort_listeners();
        debug!(subscriptions = count, "Unsubscribed from all Redis channels");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> InvalidationResult<u64> {
        let mut conn = self.command_connection().await?;
        let receivers = self
            .observe(conn.publish::<_, _, u64>(channel, payload).await)
            .map_err(|e| InvalidationError::Publish(format!("failed to publish to {channel}: {e}")))?;
        debug!(channel = %channel, receivers, "Published message");
        Ok(receivers)
    }

    async fn servers(&self) -> InvalidationResult<Vec<ServerEndpoint>> {
        let mut conn = self.command_connection().await?;
        let info: redis::RedisResult<String> = redis::cmd("INFO").arg("replication").query_async(&mut conn).await;
        let info = self
            .observe(info)
            .map_err(|e| InvalidationError::Command(format!("INFO replication failed: {e}")))?;

        Ok(vec![ServerEndpoint {
            address: self.url.clone(),
            is_replica: is_replica(&info),
            is_connected: self.is_connected(),
        }])
    }

    async fn config_get(&self, server: &ServerEndpoint) -> InvalidationResult<Vec<(String, String)>> {
        let mut conn = self.command_connection().await?;
        let values: redis::RedisResult<HashMap<String, String>> =
            redis::cmd("CONFIG").arg("GET").arg("*").query_async(&mut conn).await;
        let values = self
            .observe(values)
            .map_err(|e| InvalidationError::Command(format!("CONFIG GET on {} failed: {e}", server.address)))?;

        let mut config: Vec<(String, String)> = values.into_iter().collect();
        config.sort();
        Ok(config)
    }

    async fn close(&self) {
        self.abort_listeners();
        self.pool.close();
        self.connected.store(false, Ordering::SeqCst);
        info!(url = %self.url, "Redis transport closed");
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.abort_listeners();
    }
}

fn client_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    // CLIENT SETNAME rejects spaces.
    format!("invalidation-client-{}", host.replace(' ', "-"))
}

fn is_replica(info: &str) -> bool {
    info.lines()
        .map(str::trim)
        .any(|line| line == "role:slave" || line == "role:replica")
}

async fn open_pubsub(client: &redis::Client, channel: &str) -> redis::RedisResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    if is_pattern(channel) {
        pubsub.psubscribe(channel).await?;
    } else {
        pubsub.subscribe(channel).await?;
    }
    Ok(pubsub)
}

/// Deliver messages to `handler` until aborted, resubscribing on disconnect.
async fn listen(
    client: redis::Client,
    channel: String,
    handler: MessageHandler,
    mut pubsub: PubSub,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                backoff = INITIAL_BACKOFF;
                match msg.get_payload::<String>() {
                    Ok(payload) => handler(msg.get_channel_name(), &payload),
                    Err(e) => warn!(channel = %channel, error = %e, "failed to parse message payload"),
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        warn!(channel = %channel, "Redis pub/sub connection closed, resubscribing");
        loop {
            tokio::time::sleep(backoff).await;
            match open_pubsub(&client, &channel).await {
                Ok(fresh) => {
                    pubsub = fresh;
                    connected.store(true, Ordering::SeqCst);
                    info!(channel = %channel, "Resubscribed to Redis channel");
                    break;
                }
                Err(e) => {
                    error!(
                        channel = %channel,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Redis resubscribe failed"
                    );
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}
