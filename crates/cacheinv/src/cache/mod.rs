//! Host cache seam.
//!
//! The bus only ever removes single keys from the host cache. Dependency
//! tokens are attached by the host when it stores a value.

pub mod memory;

use std::sync::Arc;

use crate::notification::DependencyToken;

pub use memory::{CachedEntry, MemoryCache};

/// Minimal surface the bus needs from an in-process cache.
pub trait LocalCache: Send + Sync {
    /// Evict `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool;

    /// Make the entry under `key` depend on `token`.
    ///
    /// Returns `false` (and disposes the token) when there is no such entry.
    fn attach_dependency(&self, key: &str, token: Arc<DependencyToken>) -> bool;
}
