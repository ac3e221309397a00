//! Connection that opens and owns its own transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::Connection;
use super::base::Session;
use crate::error::InvalidationResult;
use crate::transport::{Connector, MessageHandler};

pub struct StandaloneConnection {
    connector: Arc<dyn Connector>,
    session: Session,
    connecting: tokio::sync::Mutex<()>,
}

impl StandaloneConnection {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            session: Session::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn address(&self) -> &str {
        self.connector.address()
    }
}

#[async_trait]
impl Connection for StandaloneConnection {
    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    async fn connect(&self) -> bool {
        let _guard = self.connecting.lock().await;
        if self.session.get().is_none() {
            match self.connector.open().await {
                Ok(transport) => self.session.set(transport),
                Err(e) => {
                    warn!(address = %self.connector.address(), error = %e, "Failed to connect");
                    return false;
                }
            }
        }
        self.session.revalidate().await
    }

    async fn disconnect(&self) {
        self.session.unsubscribe_all().await;
        if let Some(transport) = self.session.take() {
            transport.close().await;
            info!(address = %self.connector.address(), "Disconnected");
        }
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) {
        self.session.subscribe(channel, handler).await
    }

    async fn unsubscribe_all(&self) {
        self.session.unsubscribe_all().await
    }

    async fn publish(&self, channel: &str, value: &str) -> InvalidationResult<u64> {
        self.session.publish(channel, value).await
    }

    async fn get_config(&self) -> InvalidationResult<Vec<(String, String)>> {
        self.session.get_config().await
    }

    async fn probe(&self) -> InvalidationResult<bool> {
        self.session.probe().await
    }
}
