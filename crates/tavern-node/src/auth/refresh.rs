// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Refresh tokens: issuance and rotation.
//!
//! # Security model
//!
//! Raw refresh tokens are 256-bit random values shown to the client once;
//! only the SHA-256 digest is stored. Every login starts a new token
//! family; every refresh revokes the presented token and issues a
//! successor in the same family. Presenting a revoked token is treated as
//! theft and revokes the whole family (the store enforces this inside the
//! rotation transaction).

use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tavern_core::error::GameError;
use tavern_store::{QueryContext, RefreshTokenRecord, RefreshTokenRepo};
use uuid::Uuid;

use super::jwt::TokenSigner;

/// A raw refresh token — handed to the client exactly once.
#[must_use = "hand this to the client; only the hash is stored"]
#[derive(Debug)]
pub struct RawRefreshToken(String);

impl RawRefreshToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        use base64::Engine;
        RawRefreshToken(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }
}

pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// What auth endpoints return.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds, for client-side scheduling.
    pub expires_in: u64,
}

pub struct RefreshService {
    repo: RefreshTokenRepo,
    signer: TokenSigner,
    access_ttl: std::time::Duration,
    refresh_ttl: ChronoDuration,
}

impl RefreshService {
    pub fn new(
        repo: RefreshTokenRepo,
        signer: TokenSigner,
        access_ttl: std::time::Duration,
        refresh_ttl: std::time::Duration,
    ) -> Self {
        Self {
            repo,
            signer,
            access_ttl,
            refresh_ttl: ChronoDuration::from_std(refresh_ttl)
                .unwrap_or_else(|_| ChronoDuration::days(7)),
        }
    }

    /// Issue a fresh token pair in a brand-new family (login/register).
    pub async fn issue(
        &self,
        ctx: &QueryContext,
        user_id: Uuid,
        username: &str,
    ) -> Result<TokenPair, GameError> {
        let raw = RawRefreshToken::generate();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: raw.hash(),
            token_id: Uuid::new_v4(),
            expires_at: Utc::now() + self.refresh_ttl,
            revoked_at: None,
        };
        self.repo.insert(ctx, &record).await?;
        self.pair_for(user_id, username, raw)
    }

    /// Rotate a presented refresh token (the `/auth/refresh` endpoint).
    /// Returns the owner and the new raw token; the caller resolves the
    /// username and builds the pair with [`RefreshService::pair_for`].
    /// Reuse of an already-rotated token fails and revokes the family.
    pub async fn rotate(
        &self,
        ctx: &QueryContext,
        presented: &str,
    ) -> Result<(Uuid, RawRefreshToken), GameError> {
        let raw = RawRefreshToken::generate();
        let replacement = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(), // overwritten by the store with the real owner
            token_hash: raw.hash(),
            token_id: Uuid::nil(), // overwritten with the presented family
            expires_at: Utc::now() + self.refresh_ttl,
            revoked_at: None,
        };
        let outcome = self
            .repo
            .rotate(ctx, &hash_token(presented), Utc::now(), &replacement)
            .await?;
        Ok((outcome.user_id, raw))
    }

    /// Revoke a presented token (logout). Idempotent.
    pub async fn revoke(&self, ctx: &QueryContext, presented: &str) -> Result<(), GameError> {
        self.repo
            .revoke(ctx, &hash_token(presented), Utc::now())
            .await?;
        Ok(())
    }

    pub fn pair_for(
        &self,
        user_id: Uuid,
        username: &str,
        raw: RawRefreshToken,
    ) -> Result<TokenPair, GameError> {
        Ok(TokenPair {
            access_token: self.signer.sign(user_id, username)?,
            refresh_token: raw.as_str().to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
