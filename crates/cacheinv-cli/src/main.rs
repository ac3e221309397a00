mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use cacheinv::InvalidationConfig;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    cacheinv::logging::init_tracing(&cli.log_level);

    let mut config = InvalidationConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(redis) = &cli.redis {
        config.redis_url = redis.clone();
    }

    match &cli.command {
        Commands::Invalidate(args) => commands::invalidate::run(&config, &args.topics).await?,
        Commands::Listen(args) => commands::listen::run(&config, args).await?,
        Commands::Status => commands::status::run(&config).await?,
    }
    Ok(())
}
