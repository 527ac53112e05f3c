// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should default to enabled need a named
/// function.
fn default_true() -> bool {
    true
}

/// Deployment environment. Controls which configurations are acceptable:
/// production refuses weak secrets, plaintext database transport and the
/// mock AI provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        // Safe-by-default: an unset ENV is treated as production so that a
        // forgotten variable cannot silently relax the startup checks.
        Environment::Production
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(ConfigError::BadValue {
                var: "ENV".into(),
                value: other.into(),
                expected: "development | production".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub env: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port for the HTTP listener. TLS is terminated at the edge; this
    /// process serves plain HTTP behind it.
    pub port: u16,
    /// Interval between WebSocket pings on idle connections.
    #[serde(with = "humantime_serde")]
    pub ws_ping_interval: Duration,
    /// Grace period after the last pong before an idle connection is closed.
    #[serde(with = "humantime_serde")]
    pub ws_idle_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ws_ping_interval: Duration::from_secs(30),
            ws_idle_grace: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Never logged; `Debug` output of `Config` is not written anywhere by
    /// the server itself.
    pub password: String,
    pub name: String,
    /// libpq-style SSL mode string ("disable", "require", "verify-full", …).
    pub sslmode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "tavern".into(),
            password: String::new(),
            name: "tavern".into(),
            sslmode: "require".into(),
            max_open_conns: 25,
            max_idle_conns: 5,
            max_lifetime: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access-token signing. Production requires ≥ 64 chars.
    pub jwt_secret: String,
    #[serde(with = "humantime_serde")]
    pub access_token_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_token_duration: Duration,
    /// bcrypt work factor for password hashing (4–31).
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_duration: Duration::from_secs(15 * 60),
            refresh_token_duration: Duration::from_secs(7 * 24 * 3600),
            bcrypt_cost: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider identifier: "anthropic" | "mock".
    pub provider: String,
    /// API key for the hosted provider; unused by the mock.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            api_key: None,
            model: "claude-sonnet-4-5".into(),
            max_tokens: 1024,
            temperature: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated in the environment; split at load time.
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute on `/api/v1/auth/*`.
    pub auth_per_minute: u32,
    /// Requests per minute on the rest of the API surface.
    pub api_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_per_minute: 5,
            api_per_minute: 100,
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?} (expected {expected})")]
    BadValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("invalid configuration:\n{}", issues.join("\n"))]
    Invalid { issues: Vec<String> },
}

impl Config {
    /// Check the loaded configuration against the startup policy.
    ///
    /// Production mode rejects:
    /// - `JWT_SECRET` shorter than 64 characters,
    /// - `DB_SSLMODE=disable`,
    /// - `AI_PROVIDER=mock`.
    ///
    /// A handful of checks apply in every environment (port, bcrypt cost,
    /// rate-limit quotas) because a zero there breaks the process rather
    /// than weakening it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("PORT: must be non-zero".to_string());
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            issues.push(format!(
                "BCRYPT_COST: {} is outside the bcrypt range 4..=31",
                self.auth.bcrypt_cost
            ));
        }
        if self.rate_limit.auth_per_minute == 0 || self.rate_limit.api_per_minute == 0 {
            issues.push("RATE_LIMIT_AUTH / RATE_LIMIT_API: must be non-zero".to_string());
        }
        if self.database.max_open_conns == 0 {
            issues.push("DB_MAX_OPEN_CONNS: must be non-zero".to_string());
        }
        if self.database.max_idle_conns > self.database.max_open_conns {
            issues.push(format!(
                "DB_MAX_IDLE_CONNS: {} exceeds DB_MAX_OPEN_CONNS {}",
                self.database.max_idle_conns, self.database.max_open_conns
            ));
        }

        if self.env == Environment::Production {
            if self.auth.jwt_secret.len() < 64 {
                issues.push(format!(
                    "JWT_SECRET: {} chars; production requires at least 64",
                    self.auth.jwt_secret.len()
                ));
            }
            if self.database.sslmode == "disable" {
                issues.push("DB_SSLMODE: \"disable\" is not allowed in production".to_string());
            }
            if self.ai.provider == "mock" {
                issues.push("AI_PROVIDER: \"mock\" is not allowed in production".to_string());
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }
}

/// Serde glue for `Duration` fields rendered as humantime strings ("15m").
mod humantime_serde {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(D::Error::custom)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn production_baseline() -> Config {
        let mut cfg = Config::default();
        cfg.env = Environment::Production;
        cfg.auth.jwt_secret = "s".repeat(64);
        cfg.database.sslmode = "require".into();
        cfg.ai.provider = "anthropic".into();
        cfg
    }

    #[test]
    fn production_baseline_validates() {
        production_baseline().validate().unwrap();
    }

    #[test]
    fn production_rejects_short_jwt_secret() {
        let mut cfg = production_baseline();
        cfg.auth.jwt_secret = "short".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn production_rejects_disabled_ssl() {
        let mut cfg = production_baseline();
        cfg.database.sslmode = "disable".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("DB_SSLMODE"));
    }

    #[test]
    fn production_rejects_mock_provider() {
        let mut cfg = production_baseline();
        cfg.ai.provider = "mock".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("AI_PROVIDER"));
    }

    #[test]
    fn development_allows_mock_provider() {
        let mut cfg = production_baseline();
        cfg.env = Environment::Development;
        cfg.ai.provider = "mock".into();
        cfg.auth.jwt_secret = "dev".into();
        cfg.database.sslmode = "disable".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn bcrypt_cost_bounds_checked_everywhere() {
        let mut cfg = production_baseline();
        cfg.env = Environment::Development;
        cfg.auth.bcrypt_cost = 2;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("BCRYPT_COST"));
    }

    #[test]
    fn idle_conns_cannot_exceed_open_conns() {
        let mut cfg = production_baseline();
        cfg.database.max_open_conns = 4;
        cfg.database.max_idle_conns = 8;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("DB_MAX_IDLE_CONNS"));
    }

    #[test]
    fn env_defaults_to_production() {
        assert_eq!(Environment::default(), Environment::Production);
    }

    #[test]
    fn environment_parses_known_values() {
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert!("staging".parse::<Environment>().is_err());
    }
}
