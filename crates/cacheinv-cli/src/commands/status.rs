use anyhow::Result;
use cacheinv::{InvalidationConfig, InvalidationManager, InvalidationSettings};
use colored::Colorize;

use crate::output::{print_error, print_pairs};

/// Server settings worth showing by default.
const INTERESTING_KEYS: &[&str] = &[
    "notify-keyspace-events",
    "maxmemory",
    "maxmemory-policy",
    "timeout",
    "tcp-keepalive",
];

pub async fn run(config: &InvalidationConfig) -> Result<()> {
    let settings = InvalidationSettings::from_config(config).without_target_cache();
    let bus = InvalidationManager::configure(&config.redis_url, settings).await;
    let connection = bus.connection();

    println!("{}: {}", "Redis".cyan(), config.redis_url);
    println!("{}: {}", "State".cyan(), connection.state());
    println!("{}: {}", "Strategy".cyan(), config.strategy);
    if let Some(monitor) = connection.health_monitor() {
        let healthy = monitor.perform_health_check().await;
        println!("{}: {}", "Healthy".cyan(), healthy);
    }

    if bus.is_connected() {
        match connection.get_config().await {
            Ok(values) => {
                let shown: Vec<(String, String)> = values
                    .into_iter()
                    .filter(|(key, _)| INTERESTING_KEYS.contains(&key.as_str()))
                    .collect();
                print_pairs(["Setting", "Value"], &shown);
            }
            Err(e) => print_error(&format!("{e}")),
        }
    }

    InvalidationManager::reset().await;
    Ok(())
}
