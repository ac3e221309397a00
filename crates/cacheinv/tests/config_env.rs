//! Environment overrides. Kept in its own test binary since it mutates
//! the process environment.

use std::io::Write;
use std::time::Duration;

use cacheinv::{InvalidationConfig, InvalidationSettings, InvalidationStrategy};

#[test]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "redis_url = \"redis://from-file:6379\"\nmax_retry_attempts = 7\nstrategy = [\"all\"]"
    )
    .unwrap();

    // SAFETY: this binary runs a single test, so no other thread reads the environment.
    unsafe {
        std::env::set_var("CACHEINV__REDIS_URL", "redis://from-env:6380");
        std::env::set_var("CACHEINV__ENABLE_RESILIENCE", "true");
        std::env::set_var("CACHEINV__STRATEGY", "notify_dependents,remove_from_local_cache");
    }

    let config = InvalidationConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.redis_url, "redis://from-env:6380");
    assert_eq!(config.max_retry_attempts, 7);
    assert!(config.enable_resilience);
    assert_eq!(
        config.strategy,
        InvalidationStrategy::NOTIFY_DEPENDENTS | InvalidationStrategy::REMOVE_FROM_LOCAL_CACHE
    );

    let settings = InvalidationSettings::from_config(&config);
    assert!(settings.enable_resilience);
    assert_eq!(settings.health_check_interval, Duration::from_secs(30));
}
