use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cacheinv")]
#[command(about = "Publish and watch cache invalidations over Redis")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Redis address, `host:port` or `redis://...` (overrides the config file)
    #[arg(short, long, global = true, env = "CACHEINV_REDIS_URL")]
    pub redis: Option<String>,

    /// Config file (defaults to ./cacheinv.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish one or more invalidation topics
    Invalidate(InvalidateArgs),
    /// Subscribe and print invalidations as they arrive
    Listen(ListenArgs),
    /// Show connection state and server configuration
    Status,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Topics to invalidate
    #[arg(required = true)]
    pub topics: Vec<String>,
}

#[derive(clap::Args)]
pub struct ListenArgs {
    /// Also react to Redis keyspace events (`__keyevent*__:*`)
    #[arg(short, long)]
    pub keyspace: bool,

    /// Number of demo entries to seed into the local cache
    #[arg(long, default_value_t = 5)]
    pub seed: usize,
}
