//! Behaviour shared by the owned and shared connection variants.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{InvalidationError, InvalidationResult};
use crate::transport::{MessageHandler, ServerEndpoint, Transport};

/// Pick the one connected, non-replica endpoint.
pub fn select_primary(servers: &[ServerEndpoint]) -> InvalidationResult<&ServerEndpoint> {
    let mut primaries = servers.iter().filter(|s| s.is_connected && !s.is_replica);
    match (primaries.next(), primaries.next()) {
        (Some(primary), None) => Ok(primary),
        (None, _) => Err(InvalidationError::Configuration(
            "no connected primary server found".into(),
        )),
        (Some(_), Some(_)) => Err(InvalidationError::Configuration(format!(
            "expected exactly one connected primary, found {}",
            servers.iter().filter(|s| s.is_connected && !s.is_replica).count()
        ))),
    }
}

/// Slot holding the current transport, if any.
pub(crate) struct Session {
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl Session {
    pub(crate) fn new(transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            transport: RwLock::new(transport),
        }
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    pub(crate) fn set(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn Transport>> {
        self.transport.write().take()
    }

    /// Follows the outcome of the transport's last command.
    pub(crate) fn is_connected(&self) -> bool {
        self.get().is_some_and(|t| t.is_connected())
    }

    /// Connectivity of the current transport, pinging it when its last
    /// command failed.
    pub(crate) async fn revalidate(&self) -> bool {
        let Some(transport) = self.get() else {
            return false;
        };
        if transport.is_connected() {
            return true;
        }
        match transport.ping().await {
            Ok(()) => {
                info!("Transport reachable again");
                true
            }
            Err(e) => {
                debug!(error = %e, "Transport still unreachable");
                false
            }
        }
    }

    pub(crate) async fn subscribe(&self, channel: &str, handler: MessageHandler) {
        let Some(transport) = self.get() else {
            debug!(channel = %channel, "Not connected, subscribe skipped");
            return;
        };
        if let Err(e) = transport.subscribe(channel, handler).await {
            warn!(channel = %channel, error = %e, "Subscribe failed");
        }
    }

    pub(crate) async fn unsubscribe_all(&self) {
        let Some(transport) = self.get() else {
            return;
        };
        if let Err(e) = transport.unsubscribe_all().await {
            warn!(error = %e, "Unsubscribe failed");
        }
    }

    pub(crate) async fn publish(&self, channel: &str, value: &str) -> InvalidationResult<u64> {
        match self.get() {
            Some(transport) => transport.publish(channel, value).await,
            None => Ok(0),
        }
    }

    pub(crate) async fn get_config(&self) -> InvalidationResult<Vec<(String, String)>> {
        let Some(transport) = self.get() else {
            return Ok(Vec::new());
        };
        let servers = match transport.servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!(error = %e, "Listing servers failed");
                return Ok(Vec::new());
            }
        };
        let primary = select_primary(&servers)?;
        match transport.config_get(primary).await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(server = %primary.address, error = %e, "CONFIG GET failed");
                Ok(Vec::new())
            }
        }
    }

    pub(crate) async fn probe(&self) -> InvalidationResult<bool> {
        match self.get() {
            Some(transport) => transport.ping().await.map(|_| true),
            None => Ok(false),
        }
    }
}
