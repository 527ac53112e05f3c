// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tavern_core::error::{codes, GameError};
use uuid::Uuid;

/// Access-token claims. Short-lived; transmitted in the `Authorization`
/// header (REST) or the in-band `auth` message (WebSocket) — never in
/// cookies or URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    pub username: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    pub iat: i64,
    /// Token id, for log correlation.
    pub jti: Uuid,
}

/// HS256 signer/verifier around the configured secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: ChronoDuration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: std::time::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::minutes(15)),
        }
    }

    pub fn sign(&self, user_id: Uuid, username: &str) -> Result<String, GameError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id,
            username: username.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| GameError::internal(format!("signing access token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims, GameError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<AccessClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    GameError::authentication(codes::TOKEN_EXPIRED)
                }
                _ => GameError::authentication(codes::TOKEN_INVALID),
            })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
