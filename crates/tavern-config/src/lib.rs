// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Configuration for the tavern game server.
//!
//! The schema lives in [`schema`]; the environment loader in [`loader`].
//! Call [`load`] at startup, then [`Config::validate`] **before** binding any
//! sockets — production mode refuses to start with an unsafe configuration
//! (short JWT secret, plaintext database transport, mock AI provider).

mod loader;
mod schema;

pub use loader::{load, load_from};
pub use schema::{
    AiConfig, AuthConfig, Config, ConfigError, CorsConfig, DatabaseConfig, Environment,
    RateLimitConfig, RedisConfig, ServerConfig,
};
