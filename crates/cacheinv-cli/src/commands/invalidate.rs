use anyhow::Result;
use cacheinv::{InvalidationConfig, InvalidationManager, InvalidationSettings};
use colored::Colorize;

use crate::output::{print_success, print_warning};

pub async fn run(config: &InvalidationConfig, topics: &[String]) -> Result<()> {
    // Publishing only; nothing local to evict.
    let settings = InvalidationSettings::from_config(config).without_target_cache();
    super::connect(config, settings).await?;

    for topic in topics {
        let receivers = InvalidationManager::invalidate(topic).await;
        if receivers == 0 {
            print_warning(&format!("{} reached no subscribers", topic.bold()));
        } else {
            print_success(&format!("{} delivered to {receivers} subscriber(s)", topic.bold()));
        }
    }

    InvalidationManager::reset().await;
    Ok(())
}
