//! Connection abstraction over a pub/sub transport.
//!
//! | Variant | Owns the session | `disconnect` |
//! |---------|------------------|--------------|
//! | [`StandaloneConnection`] | yes, opened from an address | unsubscribes and closes |
//! | [`SharedConnection`] | no, caller-supplied | unsubscribes only |
//! | [`ResilientConnection`] | wraps either | delegates |
//!
//! Connection failures are logged and reported as `false` / `0`, never as
//! errors. The one exception is an ambiguous or missing primary in
//! [`Connection::get_config`].

mod base;
pub mod resilient;
pub mod shared;
pub mod standalone;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InvalidationResult;
use crate::settings::InvalidationSettings;
use crate::transport::{Connector, MessageHandler, RedisConnector, Transport};

pub use base::select_primary;
pub use resilient::{HealthObserver, ResilientConnection};
pub use shared::SharedConnection;
pub use standalone::StandaloneConnection;

/// Coarse connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// Connected, but the last health check failed.
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    fn is_connected(&self) -> bool;

    fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Establish the session if needed, or ping one whose last command
    /// failed. Never fails; returns connectivity.
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    /// No-op without a session.
    async fn subscribe(&self, channel: &str, handler: MessageHandler);

    async fn unsubscribe_all(&self);

    /// Publish and return the receiver count; `Ok(0)` without a session.
    ///
    /// An existing session is always tried, even after a failed command,
    /// so traffic resumes as soon as the server answers again.
    async fn publish(&self, channel: &str, value: &str) -> InvalidationResult<u64>;

    /// `CONFIG GET *` from the single connected primary.
    ///
    /// Empty without a session or when the server cannot be read. Errors with a configuration error when
    /// zero or several connected primaries are known.
    async fn get_config(&self) -> InvalidationResult<Vec<(String, String)>>;

    /// Liveness round-trip used by health polling.
    async fn probe(&self) -> InvalidationResult<bool> {
        Ok(self.is_connected())
    }

    fn health_monitor(&self) -> Option<&dyn HealthMonitor> {
        None
    }
}

/// Health tracking exposed by [`ResilientConnection`].
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    fn is_healthy(&self) -> bool;

    /// Probe now and update the health flag.
    async fn perform_health_check(&self) -> bool;

    /// Register an observer called with the new health on every transition.
    fn on_health_changed(&self, observer: HealthObserver);
}

/// Connect to `address` (`host:port` or `redis://...`).
pub fn from_address(address: &str, settings: &InvalidationSettings) -> Arc<dyn Connection> {
    let connector = RedisConnector::new(address)
        .with_pool_size(settings.pool_size)
        .with_connect_timeout(settings.connect_timeout);
    from_connector(Arc::new(connector), settings)
}

/// Own sessions opened by `connector`.
pub fn from_connector(connector: Arc<dyn Connector>, settings: &InvalidationSettings) -> Arc<dyn Connection> {
    wrap(Arc::new(StandaloneConnection::new(connector)), settings)
}

/// Reuse a session owned by the caller.
pub fn from_transport(transport: Arc<dyn Transport>, settings: &InvalidationSettings) -> Arc<dyn Connection> {
    wrap(Arc::new(SharedConnection::new(transport)), settings)
}

fn wrap(connection: Arc<dyn Connection>, settings: &InvalidationSettings) -> Arc<dyn Connection> {
    if settings.enable_resilience {
        Arc::new(ResilientConnection::new(connection, settings.health_check_interval))
    } else {
        connection
    }
}
