//! What the bus does with each inbound invalidation message.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A single strategy flag, as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFlag {
    NotifyDependents,
    RemoveFromLocalCache,
    InvokeExternalCallback,
    All,
}

/// Set of independent actions applied to every inbound topic.
///
/// Combine with `|`; test with [`InvalidationStrategy::contains`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StrategyFlag>", into = "Vec<StrategyFlag>")]
pub struct InvalidationStrategy {
    notify_dependents: bool,
    remove_from_local_cache: bool,
    invoke_external_callback: bool,
}

impl InvalidationStrategy {
    pub const NONE: Self = Self {
        notify_dependents: false,
        remove_from_local_cache: false,
        invoke_external_callback: false,
    };
    /// Fire in-process dependency tokens for the topic.
    pub const NOTIFY_DEPENDENTS: Self = Self {
        notify_dependents: true,
        ..Self::NONE
    };
    /// Remove the key equal to the topic from the target cache.
    pub const REMOVE_FROM_LOCAL_CACHE: Self = Self {
        remove_from_local_cache: true,
        ..Self::NONE
    };
    /// Call the configured callback with the topic.
    pub const INVOKE_EXTERNAL_CALLBACK: Self = Self {
        invoke_external_callback: true,
        ..Self::NONE
    };
    pub const ALL: Self = Self {
        notify_dependents: true,
        remove_from_local_cache: true,
        invoke_external_callback: true,
    };

    /// True when every flag set in `other` is also set here.
    pub const fn contains(self, other: Self) -> bool {
        (!other.notify_dependents || self.notify_dependents)
            && (!other.remove_from_local_cache || self.remove_from_local_cache)
            && (!other.invoke_external_callback || self.invoke_external_callback)
    }

    pub const fn is_empty(self) -> bool {
        !self.notify_dependents && !self.remove_from_local_cache && !self.invoke_external_callback
    }

    pub fn flags(self) -> Vec<StrategyFlag> {
        let mut flags = Vec::new();
        if self.notify_dependents {
            flags.push(StrategyFlag::NotifyDependents);
        }
        if self.remove_from_local_cache {
            flags.push(StrategyFlag::RemoveFromLocalCache);
        }
        if self.invoke_external_callback {
            flags.push(StrategyFlag::InvokeExternalCallback);
        }
        flags
    }
}

impl Default for InvalidationStrategy {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for InvalidationStrategy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            notify_dependents: self.notify_dependents || rhs.notify_dependents,
            remove_from_local_cache: self.remove_from_local_cache || rhs.remove_from_local_cache,
            invoke_external_callback: self.invoke_external_callback || rhs.invoke_external_callback,
        }
    }
}

impl BitOrAssign for InvalidationStrategy {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl From<StrategyFlag> for InvalidationStrategy {
    fn from(flag: StrategyFlag) -> Self {
        match flag {
            StrategyFlag::NotifyDependents => Self::NOTIFY_DEPENDENTS,
            StrategyFlag::RemoveFromLocalCache => Self::REMOVE_FROM_LOCAL_CACHE,
            StrategyFlag::InvokeExternalCallback => Self::INVOKE_EXTERNAL_CALLBACK,
            StrategyFlag::All => Self::ALL,
        }
    }
}

impl From<Vec<StrategyFlag>> for InvalidationStrategy {
    fn from(flags: Vec<StrategyFlag>) -> Self {
        flags.into_iter().fold(Self::NONE, |acc, flag| acc | flag.into())
    }
}

impl From<InvalidationStrategy> for Vec<StrategyFlag> {
    fn from(strategy: InvalidationStrategy) -> Self {
        strategy.flags()
    }
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self
            .flags()
            .into_iter()
            .map(|flag| match flag {
                StrategyFlag::NotifyDependents => "notify_dependents",
                StrategyFlag::RemoveFromLocalCache => "remove_from_local_cache",
                StrategyFlag::InvokeExternalCallback => "invoke_external_callback",
                StrategyFlag::All => "all",
            })
            .collect();
        write!(f, "{}", names.join("|"))
    }
}
