//! In-process topic notifications and the dependency-token bridge.

pub mod manager;
pub mod token;

pub use manager::{NotificationObserver, Notifier, Subscription, TopicNotificationManager};
pub use token::{DependencyToken, TokenState};
