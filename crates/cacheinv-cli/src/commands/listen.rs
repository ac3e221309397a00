use anyhow::Result;
use cacheinv::{InvalidationConfig, InvalidationManager, InvalidationSettings, InvalidationStrategy, MemoryCache};
use colored::Colorize;

use crate::cli::ListenArgs;
use crate::output::print_success;

const DEMO_DEPENDENCY: &str = "dep-key";

pub async fn run(config: &InvalidationConfig, args: &ListenArgs) -> Result<()> {
    let cache = MemoryCache::shared_default();
    let settings = InvalidationSettings::from_config(config)
        .with_strategy(InvalidationStrategy::ALL)
        .with_target_cache(cache.clone())
        .with_keyspace_notifications(args.keyspace || config.enable_keyspace_notifications)
        .with_callback({
            let cache = cache.clone();
            move |topic: &str| {
                println!(
                    "{} {}  {}",
                    "invalidated".cyan(),
                    topic.bold(),
                    format!("({} cached)", cache.len()).dimmed()
                );
            }
        });
    super::connect(config, settings).await?;

    seed(&cache, args.seed);
    print_success(&format!(
        "Listening on {} with {} cached entries. Try `cacheinv invalidate {DEMO_DEPENDENCY}` or `item-1`. Ctrl-C to stop.",
        config.redis_url,
        cache.len()
    ));

    tokio::signal::ctrl_c().await?;
    InvalidationManager::reset().await;
    Ok(())
}

/// `item-1..=item-n`; odd items also depend on [`DEMO_DEPENDENCY`].
fn seed(cache: &MemoryCache, count: usize) {
    for n in 1..=count {
        let key = format!("item-{n}");
        let value = uuid::Uuid::new_v4().to_string().into_bytes();
        if n % 2 == 1 {
            let token = InvalidationManager::create_change_monitor(DEMO_DEPENDENCY);
            cache.set_with_dependencies(&key, value, None, vec![token]);
        } else {
            cache.set(&key, value, None);
        }
    }
}
