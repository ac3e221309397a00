//! Connection over a transport owned by the host application.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Connection;
use super::base::Session;
use crate::error::InvalidationResult;
use crate::transport::{MessageHandler, Transport};

/// Borrows the host's session. Never opens or closes it.
pub struct SharedConnection {
    session: Session,
}

impl SharedConnection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: Session::new(Some(transport)),
        }
    }
}

#[async_trait]
impl Connection for SharedConnection {
    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    async fn connect(&self) -> bool {
        self.session.revalidate().await
    }

    async fn disconnect(&self) {
        self.session.unsubscribe_all().await;
        debug!("Released shared transport subscriptions");
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
