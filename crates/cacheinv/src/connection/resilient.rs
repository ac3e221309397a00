//! Health-tracking decorator around any [`Connection`].
//!
//! `connect` marks the connection healthy when it succeeds and starts a
//! background task that probes the inner connection every
//! `health_check_interval`. `disconnect` marks it unhealthy and stops the
//! task. While unhealthy, `subscribe`, `publish` and `get_config` return
//! immediately without touching the network. Observers registered with
//! [`HealthMonitor::on_health_changed`] fire on every transition only.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use super::{Connection, ConnectionState, HealthMonitor};
use crate::error::InvalidationResult;
use crate::transport::MessageHandler;

pub type HealthObserver = Arc<dyn Fn(bool) + Send + Sync>;

struct HealthState {
    inner: Arc<dyn Connection>,
    healthy: Mutex<bool>,
    observers: RwLock<Vec<HealthObserver>>,
}

impl HealthState {
    async fn check(&self) -> bool {
        let healthy = match self.inner.probe().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        };
        self.update(healthy);
        healthy
    }

    fn update(&self, healthy: bool) {
        let changed = {
            let mut current = self.healthy.lock();
            let changed = *current != healthy;
            *current = healthy;
            changed
        };
        if !changed {
            return;
        }

        if healthy {
            info!("Connection healthy again");
        } else {
            warn!("Connection unhealthy");
        }
        let observers = self.observers.read().clone();
        for observer in observers {
            observer(healthy);
        }
    }

    fn is_healthy(&self) -> bool {
        *self.healthy.lock()
    }
}

pub struct ResilientConnection {
    state: Arc<HealthState>,
    interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientConnection {
    /// Wrap `inner`. Polling starts with the first [`Connection::connect`],
    /// so this works outside a Tokio runtime.
    pub fn new(inner: Arc<dyn Connection>, health_check_interval: Duration) -> Self {
        Self {
            state: Arc::new(HealthState {
                inner,
                healthy: Mutex::new(true),
                observers: RwLock::new(Vec::new()),
            }),
            interval: health_check_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.state.inner
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(|p| !p.is_finished())
    }

    fn start_polling(&self) {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|p| !p.is_finished()) {
            return;
        }
        let task = poll(Arc::downgrade(&self.state), self.interval).with_current_subscriber();
        *poller = Some(tokio::spawn(task));
        debug!(interval_ms = self.interval.as_millis() as u64, "Health polling started");
    }

    fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
            debug!("Health polling stopped");
        }
    }
}

async fn poll(state: Weak<HealthState>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };
        state.check().await;
    }
}

impl Drop for ResilientConnection {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

#[async_trait]
impl Connection for ResilientConnection {
    fn is_connected(&self) -> bool {
        self.state.inner.is_connected()
    }

    fn state(&self) -> ConnectionState {
        match (self.state.inner.is_connected(), self.state.is_healthy()) {
            (false, _) => ConnectionState::Disconnected,
            (true, true) => ConnectionState::Connected,
            (true, false) => ConnectionState::Degraded,
        }
    }

    async fn connect(&self) -> bool {
        let connected = self.state.inner.connect().await;
        self.state.update(connected);
        self.start_polling();
        connected
    }

    async fn disconnect(&self) {
        self.stop_polling();
        self.state.inner.disconnect().await;
        self.state.update(false);
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) {
        if !self.state.is_healthy() {
            debug!(channel = %channel, "Unhealthy, subscribe skipped");
            return;
        }
        self.state.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe_all(&self) {
        self.state.inner.unsubscribe_all().await
    }

    async fn publish(&self, channel: &str, value: &str) -> InvalidationResult<u64> {
        if !self.state.is_healthy() {
            debug!(channel = %channel, "Unhealthy, publish skipped");
            return Ok(0);
        }
        self.state.inner.publish(channel, value).await
    }

    async fn get_config(&self) -> InvalidationResult<Vec<(String, String)>> {
        if !self.state.is_healthy() {
            return Ok(Vec::new());
        }
        self.state.inner.get_config().await
    }

    async fn probe(&self) -> InvalidationResult<bool> {
        self.state.inner.probe().await
    }

    fn health_monitor(&self) -> Option<&dyn HealthMonitor> {
        Some(self)
    }
}

#[async_trait]
impl HealthMonitor for ResilientConnection {
    fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }

    async fn perform_health_check(&self) -> bool {
        self.state.check().await
    }

    fn on_health_changed(&self, observer: HealthObserver) {
        self.state.observers.write().push(observer);
    }
}
