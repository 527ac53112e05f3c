// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::{Config, Environment};

/// Load configuration from the process environment.
///
/// Every recognized variable overrides the schema default; unset variables
/// keep their defaults. Call [`Config::validate`] afterwards — loading only
/// parses, it does not enforce the startup policy.
pub fn load() -> anyhow::Result<Config> {
    load_from(|name| std::env::var(name).ok())
}

/// Load configuration through an explicit lookup function.
///
/// The indirection keeps the parser testable without mutating the process
/// environment (which is global state shared across the test binary).
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let mut cfg = Config::default();

    if let Some(v) = lookup("ENV") {
        cfg.env = v.parse::<Environment>()?;
        debug!(env = ?cfg.env, "environment selected");
    }

    // ── Server ────────────────────────────────────────────────────────────────
    set_parsed(&lookup, "PORT", &mut cfg.server.port)?;

    // ── Database ──────────────────────────────────────────────────────────────
    set_string(&lookup, "DB_HOST", &mut cfg.database.host);
    set_parsed(&lookup, "DB_PORT", &mut cfg.database.port)?;
    set_string(&lookup, "DB_USER", &mut cfg.database.user);
    set_string(&lookup, "DB_PASSWORD", &mut cfg.database.password);
    set_string(&lookup, "DB_NAME", &mut cfg.database.name);
    set_string(&lookup, "DB_SSLMODE", &mut cfg.database.sslmode);
    set_parsed(&lookup, "DB_MAX_OPEN_CONNS", &mut cfg.database.max_open_conns)?;
    set_parsed(&lookup, "DB_MAX_IDLE_CONNS", &mut cfg.database.max_idle_conns)?;
    set_duration(&lookup, "DB_MAX_LIFETIME", &mut cfg.database.max_lifetime)?;

    // ── Redis ─────────────────────────────────────────────────────────────────
    set_string(&lookup, "REDIS_HOST", &mut cfg.redis.host);
    set_parsed(&lookup, "REDIS_PORT", &mut cfg.redis.port)?;
    set_string(&lookup, "REDIS_PASSWORD", &mut cfg.redis.password);
    set_parsed(&lookup, "REDIS_DB", &mut cfg.redis.db)?;

    // ── Auth ──────────────────────────────────────────────────────────────────
    set_string(&lookup, "JWT_SECRET", &mut cfg.auth.jwt_secret);
    set_duration(
        &lookup,
        "ACCESS_TOKEN_DURATION",
        &mut cfg.auth.access_token_duration,
    )?;
    set_duration(
        &lookup,
        "REFRESH_TOKEN_DURATION",
        &mut cfg.auth.refresh_token_duration,
    )?;
    set_parsed(&lookup, "BCRYPT_COST", &mut cfg.auth.bcrypt_cost)?;

    // ── AI provider ───────────────────────────────────────────────────────────
    set_string(&lookup, "AI_PROVIDER", &mut cfg.ai.provider);
    if let Some(v) = lookup("AI_API_KEY") {
        cfg.ai.api_key = Some(v);
    }
    set_string(&lookup, "AI_MODEL", &mut cfg.ai.model);
    set_parsed(&lookup, "AI_MAX_TOKENS", &mut cfg.ai.max_tokens)?;
    set_parsed(&lookup, "AI_TEMPERATURE", &mut cfg.ai.temperature)?;

    // ── CORS ──────────────────────────────────────────────────────────────────
    if let Some(v) = lookup("CORS_ALLOWED_ORIGINS") {
        cfg.cors.allowed_origins = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    set_parsed(
        &lookup,
        "CORS_ALLOW_CREDENTIALS",
        &mut cfg.cors.allow_credentials,
    )?;

    // ── Rate limits ───────────────────────────────────────────────────────────
    set_parsed(&lookup, "RATE_LIMIT_AUTH", &mut cfg.rate_limit.auth_per_minute)?;
    set_parsed(&lookup, "RATE_LIMIT_API", &mut cfg.rate_limit.api_per_minute)?;

    Ok(cfg)
}

// ── Parse helpers ─────────────────────────────────────────────────────────────

fn set_string(lookup: &impl Fn(&str) -> Option<String>, var: &str, slot: &mut String) {
    if let Some(v) = lookup(var) {
        *slot = v;
    }
}

fn set_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    slot: &mut T,
) -> anyhow::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = lookup(var) {
        *slot = v.parse().with_context(|| format!("parsing {var}={v:?}"))?;
    }
    Ok(())
}

/// Durations accept humantime strings ("15m", "1h 30m") and, for
/// compatibility with integer-style deployments, a bare number of seconds.
fn set_duration(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    slot: &mut Duration,
) -> anyhow::Result<()> {
    if let Some(v) = lookup(var) {
        if let Ok(secs) = v.parse::<u64>() {
            *slot = Duration::from_secs(secs);
        } else {
            *slot = humantime::parse_duration(&v).with_context(|| format!("parsing {var}={v:?}"))?;
        }
    }
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load_map(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map = env(pairs);
        load_from(|name| map.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = load_map(&[]).unwrap();
        assert_eq!(cfg.env, Environment::Production);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.rate_limit.auth_per_minute, 5);
        assert_eq!(cfg.rate_limit.api_per_minute, 100);
    }

    #[test]
    fn recognized_variables_override_defaults() {
        let cfg = load_map(&[
            ("ENV", "development"),
            ("PORT", "9000"),
            ("DB_HOST", "db.internal"),
            ("DB_MAX_OPEN_CONNS", "50"),
            ("AI_PROVIDER", "mock"),
            ("RATE_LIMIT_API", "250"),
        ])
        .unwrap();
        assert_eq!(cfg.env, Environment::Development);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.database.host, "db.internal");
        assert_eq!(cfg.database.max_open_conns, 50);
        assert_eq!(cfg.ai.provider, "mock");
        assert_eq!(cfg.rate_limit.api_per_minute, 250);
    }

    #[test]
    fn durations_accept_humantime_and_seconds() {
        let cfg = load_map(&[
            ("ACCESS_TOKEN_DURATION", "15m"),
            ("REFRESH_TOKEN_DURATION", "604800"),
        ])
        .unwrap();
        assert_eq!(cfg.auth.access_token_duration, Duration::from_secs(900));
        assert_eq!(
            cfg.auth.refresh_token_duration,
            Duration::from_secs(604_800)
        );
    }

    #[test]
    fn cors_origins_split_and_trimmed() {
        let cfg = load_map(&[(
            "CORS_ALLOWED_ORIGINS",
            "https://play.example.com, https://admin.example.com",
        )])
        .unwrap();
        assert_eq!(
            cfg.cors.allowed_origins,
            vec![
                "https://play.example.com".to_string(),
                "https://admin.example.com".to_string()
            ]
        );
    }

    #[test]
    fn bad_port_is_a_load_error() {
        let err = load_map(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn bad_env_is_a_load_error() {
        assert!(load_map(&[("ENV", "staging")]).is_err());
    }

    #[test]
    fn api_key_is_only_set_when_present() {
        let cfg = load_map(&[]).unwrap();
        assert!(cfg.ai.api_key.is_none());
        let cfg = load_map(&[("AI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(cfg.ai.api_key.as_deref(), Some("sk-test"));
    }
}
