// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = tavern_config::load()?;
            tavern_node::run(config).await
        }
        Commands::ConfigCheck { json } => config_check(json),
    }
}

fn config_check(json: bool) -> anyhow::Result<()> {
    let config = tavern_config::load()?;
    let validation = config.validate();
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("environment:       {:?}", config.env);
        println!("port:              {}", config.server.port);
        println!(
            "database:          {}@{}:{}/{} (sslmode={})",
            config.database.user,
            config.database.host,
            config.database.port,
            config.database.name,
            config.database.sslmode
        );
        println!("ai provider:       {} ({})", config.ai.provider, config.ai.model);
        println!(
            "rate limits:       auth {}/min, api {}/min",
            config.rate_limit.auth_per_minute, config.rate_limit.api_per_minute
        );
    }
    validation?;
    println!("configuration OK");
    Ok(())
}

/// Logging goes to stderr. `TAVERN_LOG` controls the filter
/// (`tavern=debug,tower_http=info` style); `--verbose` forces debug.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TAVERN_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
