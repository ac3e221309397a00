//! DashMap-backed local cache with TTL and dependency tokens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::LocalCache;
use crate::notification::DependencyToken;

static DEFAULT_CACHE: OnceLock<Arc<MemoryCache>> = OnceLock::new();

/// A cached entry with optional TTL and the tokens it depends on.
///
/// The data is wrapped in `Arc` so cache hits are cheap to hand out.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Option<Duration>,
    generation: u64,
    dependencies: Vec<Arc<DependencyToken>>,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>, generation: u64) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
            generation,
            dependencies: Vec::new(),
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }

    pub fn dependencies(&self) -> &[Arc<DependencyToken>] {
        &self.dependencies
    }

    fn release(self) {
        for token in &self.dependencies {
            token.dispose();
        }
    }
}

/// In-process cache whose entries can be evicted by dependency tokens.
///
/// Evicting an entry for any reason (explicit removal, overwrite, TTL)
/// disposes the tokens attached to it, which releases their subscriptions.
pub struct MemoryCache {
    name: String,
    entries: Arc<DashMap<String, CachedEntry>>,
    generations: AtomicU64,
}

impl MemoryCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// The process-wide default instance.
    pub fn shared_default() -> Arc<MemoryCache> {
        DEFAULT_CACHE
            .get_or_init(|| Arc::new(MemoryCache::new("default")))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a value, dropping it first if its TTL has passed.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(Arc::clone(&entry.data)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove(key);
        }
        None
    }

    /// Insert or overwrite a value without dependencies.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.insert(key, CachedEntry::new(value, ttl, self.next_generation()));
    }

    /// Insert a value that is evicted as soon as any of `dependencies` fires.
    ///
    /// Returns `false` when a dependency had already expired, in which case
    /// the value is not kept.
    pub fn set_with_dependencies(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        dependencies: Vec<Arc<DependencyToken>>,
    ) -> bool {
        let generation = self.next_generation();
        let mut entry = CachedEntry::new(value, ttl, generation);
        entry.dependencies = dependencies.clone();
        self.insert(key, entry);

        // Hooks are attached after the shard lock is gone: an expired token
        // runs its hook immediately and that hook removes the entry.
        for token in dependencies {
            self.watch(key, generation, &token);
        }
        self.entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn insert(&self, key: &str, entry: CachedEntry) {
        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            previous.release();
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn watch(&self, key: &str, generation: u64, token: &DependencyToken) {
        let entries = Arc::downgrade(&self.entries);
        let key = key.to_string();
        token.attach(move |topic| {
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let removed = entries.remove_if(&key, |_, entry| entry.generation == generation);
            if let Some((_, entry)) = removed {
                tracing::debug!(key = %key, topic = %topic, "cache entry evicted by dependency");
                entry.release();
            }
        });
    }
}

impl LocalCache for MemoryCache {
    fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                entry.release();
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    fn attach_dependency(&self, key: &str, token: Arc<DependencyToken>) -> bool {
        let generation = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.dependencies.push(Arc::clone(&token));
                entry.generation
            }
            None => {
                token.dispose();
                return false;
            }
        };
        self.watch(key, generation, &token);
        true
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}
