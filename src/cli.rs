// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "tavern",
    about = "Multi-tenant, AI-augmented tabletop RPG game server",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log to stderr at debug level (overrides TAVERN_LOG).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the game server node (the default when no command is given).
    ///
    /// Configuration comes from the environment — see the deployment
    /// notes for the recognized variable set. In production mode startup
    /// fails fast on unsafe configuration (short JWT secret, plaintext
    /// database transport, mock AI provider).
    Serve,

    /// Load the configuration from the environment, run the startup
    /// validation, and print the effective values.
    ///
    /// Exits non-zero when validation fails, so it doubles as a
    /// pre-deploy check.
    ConfigCheck {
        /// Print as JSON instead of the human-readable form.
        #[arg(long)]
        json: bool,
    },
}
