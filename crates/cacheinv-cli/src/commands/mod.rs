pub mod invalidate;
pub mod listen;
pub mod status;

use std::sync::Arc;

use anyhow::{Result, bail};
use cacheinv::{InvalidationBus, InvalidationConfig, InvalidationManager, InvalidationSettings};

/// Configure the global bus and fail if Redis is unreachable.
async fn connect(config: &InvalidationConfig, settings: InvalidationSettings) -> Result<Arc<InvalidationBus>> {
    let bus = InvalidationManager::configure(&config.redis_url, settings).await;
    if !bus.is_connected() {
        InvalidationManager::reset().await;
        bail!("could not connect to Redis at {}", config.redis_url);
    }
    Ok(bus)
}
