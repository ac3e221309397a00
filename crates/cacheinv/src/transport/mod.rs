//! Pub/sub transport seam.
//!
//! A [`Transport`] is one live session with the pub/sub server (the Redis
//! client and its pooled connections, or an in-process broker handle). A
//! [`Connector`] knows how to open one. Connections in [`crate::connection`]
//! sit on top of these traits and never talk to the client library directly.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InvalidationResult;

pub use memory::{MemoryBroker, MemoryConnector, MemoryTransport};
pub use self::redis::{RedisConnector, RedisTransport, normalize_address};

/// Callback for inbound messages: `(channel, payload)`.
///
/// Runs on the transport's message task. It must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// One server known to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub address: String,
    pub is_replica: bool,
    pub is_connected: bool,
}

impl ServerEndpoint {
    pub fn primary(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_replica: false,
            is_connected: true,
        }
    }

    pub fn replica(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_replica: true,
            is_connected: true,
        }
    }
}

/// A live pub/sub session.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Round-trip to the server.
    async fn ping(&self) -> InvalidationResult<()>;

    /// Subscribe `handler` to `channel`. Glob channels are pattern subscriptions.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> InvalidationResult<()>;

    async fn unsubscribe_all(&self) -> InvalidationResult<()>;

    /// Publish `payload`, returning how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> InvalidationResult<u64>;

    async fn servers(&self) -> InvalidationResult<Vec<ServerEndpoint>>;

    async fn config_get(&self, server: &ServerEndpoint) -> InvalidationResult<Vec<(String, String)>>;

    /// Tear the session down. Only called by the owner of the session.
    async fn close(&self);
}

/// Opens transports for connections that own their session.
#[async_trait]
pub trait Connector: Send + Sync {
    fn address(&self) -> &str;

    async fn open(&self) -> InvalidationResult<Arc<dyn Transport>>;
}

/// Whether `channel` must be subscribed as a pattern.
pub fn is_pattern(channel: &str) -> bool {
    channel.contains(['*', '?', '['])
}

/// Redis-style glob match supporting `*`, `?`, `[...]` classes and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t])
                        && matched
                    {
                        p = next;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match one byte against the class starting at `pattern[start] == b'['`.
///
/// Returns whether it matched and the index just past the class, or `None`
/// when the class is unterminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }
    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
