//! Process-wide access point for hosts that want a single bus.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::bus::InvalidationBus;
use crate::notification::DependencyToken;
use crate::settings::InvalidationSettings;
use crate::transport::Transport;

static BUS: RwLock<Option<Arc<InvalidationBus>>> = RwLock::new(None);

/// Global facade over one [`InvalidationBus`].
///
/// Every method is safe to call before `configure`: `invalidate` returns 0,
/// `create_change_monitor` hands out an expired token.
pub struct InvalidationManager;

impl InvalidationManager {
    /// Start a bus against `address` and make it the global one.
    ///
    /// A previously configured bus is stopped. Connection failure is not an
    /// error; check [`InvalidationManager::is_connected`].
    pub async fn configure(address: &str, settings: InvalidationSettings) -> Arc<InvalidationBus> {
        Self::install(Arc::new(InvalidationBus::from_address(address, settings))).await
    }

    /// Like [`InvalidationManager::configure`] over a session the caller owns.
    pub async fn configure_with_transport(
        transport: Arc<dyn Transport>,
        settings: InvalidationSettings,
    ) -> Arc<InvalidationBus> {
        Self::install(Arc::new(InvalidationBus::from_transport(transport, settings))).await
    }

    /// Start `bus` and make it the global one.
    pub async fn install(bus: Arc<InvalidationBus>) -> Arc<InvalidationBus> {
        bus.start().await;
        let previous = BUS.write().replace(bus.clone());
        if let Some(previous) = previous {
            debug!("Replacing configured invalidation bus");
            previous.stop().await;
        }
        bus
    }

    pub fn bus() -> Option<Arc<InvalidationBus>> {
        BUS.read().clone()
    }

    pub fn is_connected() -> bool {
        Self::bus().is_some_and(|bus| bus.is_connected())
    }

    pub async fn invalidate(topic: &str) -> u64 {
        match Self::bus() {
            Some(bus) => bus.invalidate(topic).await,
            None => 0,
        }
    }

    pub fn create_change_monitor(topic: &str) -> Arc<DependencyToken> {
        match Self::bus() {
            Some(bus) => bus.create_change_monitor(topic),
            None => DependencyToken::expired(topic),
        }
    }

    /// Stop and forget the global bus.
    pub async fn reset() {
        let previous = BUS.write().take();
        if let Some(bus) = previous {
            bus.stop().await;
        }
    }
}
