// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Refresh-token persistence.
//!
//! Tokens are stored as SHA-256 hashes; the raw value travels to the client
//! once and is never persisted. Rotation (validate + revoke + issue) is one
//! transaction, and presenting an already-revoked token revokes every live
//! sibling in the same family — the standard defense against a stolen
//! refresh token being replayed after the legitimate client rotated it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::QueryContext;
use crate::db::{opt_text, text, Database};
use crate::error::StoreError;

use super::{fmt_time, get_opt_time, get_time, get_uuid};

/// One stored refresh token. `token_id` names the family: every rotation
/// keeps the family id, so reuse detection can revoke all descendants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Hex SHA-256 of the raw token.
    pub token_hash: String,
    /// Family id, stable across rotations.
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A successful rotation: the old token is revoked, the new one stored.
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub user_id: Uuid,
    pub family: Uuid,
}

pub struct RefreshTokenRepo {
    db: Arc<Database>,
}

impl RefreshTokenRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        ctx: &QueryContext,
        record: &RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "INSERT INTO refresh_tokens (id, user_id, token_hash, token_id, expires_at, revoked_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                vec![
                    text(record.id.to_string()),
                    text(record.user_id.to_string()),
                    text(&record.token_hash),
                    text(record.token_id.to_string()),
                    text(fmt_time(record.expires_at)),
                    opt_text(record.revoked_at.map(fmt_time)),
                ],
            )
            .await?;
        Ok(())
    }

    /// Validate a presented token hash and rotate it for `replacement`.
    ///
    /// One transaction covers the whole decision:
    /// - unknown hash → `NotFound`;
    /// - revoked hash → revoke the entire family, `TokenReused`;
    /// - expired hash → `NotFound` (indistinguishable from unknown);
    /// - live hash → revoke it, insert `replacement`, return the owner.
    ///
    /// `replacement.token_id` is overwritten with the presented token's
    /// family so descendants stay linked.
    pub async fn rotate(
        &self,
        ctx: &QueryContext,
        presented_hash: &str,
        now: DateTime<Utc>,
        replacement: &RefreshTokenRecord,
    ) -> Result<RotationOutcome, StoreError> {
        let presented_hash = presented_hash.to_string();
        let replacement = replacement.clone();
        self.db
            .with_tx(ctx, move |tx| {
                let existing = tx
                    .query_opt(
                        "SELECT id, user_id, token_hash, token_id, expires_at, revoked_at \
                         FROM refresh_tokens WHERE token_hash = ?",
                        vec![text(&presented_hash)],
                        map_token,
                    )?
                    .ok_or(StoreError::NotFound {
                        entity: "refresh token",
                    })?;

                if existing.revoked_at.is_some() {
                    // Reuse: the legitimate holder already rotated this
                    // token. Kill every live token in the family.
                    tx.execute(
                        "UPDATE refresh_tokens SET revoked_at = ? \
                         WHERE token_id = ? AND revoked_at IS NULL",
                        vec![
                            text(fmt_time(now)),
                            text(existing.token_id.to_string()),
                        ],
                    )?;
                    return Err(StoreError::TokenReused);
                }
                if existing.expires_at <= now {
                    return Err(StoreError::NotFound {
                        entity: "refresh token",
                    });
                }

                tx.execute(
                    "UPDATE refresh_tokens SET revoked_at = ? WHERE id = ?",
                    vec![text(fmt_time(now)), text(existing.id.to_string())],
                )?;
                tx.execute(
                    "INSERT INTO refresh_tokens (id, user_id, token_hash, token_id, expires_at, revoked_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    vec![
                        text(replacement.id.to_string()),
                        text(existing.user_id.to_string()),
                        text(&replacement.token_hash),
                        text(existing.token_id.to_string()),
                        text(fmt_time(replacement.expires_at)),
                        opt_text(None),
                    ],
                )?;

                Ok(RotationOutcome {
                    user_id: existing.user_id,
                    family: existing.token_id,
                })
            })
            .await
    }

    /// Revoke a single token (logout). Unknown hashes are a no-op: logout
    /// is idempotent.
    pub async fn revoke(
        &self,
        ctx: &QueryContext,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "UPDATE refresh_tokens SET revoked_at = ? WHERE token_hash = ? AND revoked_at IS NULL",
                vec![text(fmt_time(now)), text(token_hash)],
            )
            .await?;
        Ok(())
    }

    pub async fn by_hash(
        &self,
        ctx: &QueryContext,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.db
            .query_opt(
                ctx,
                "SELECT id, user_id, token_hash, token_id, expires_at, revoked_at \
                 FROM refresh_tokens WHERE token_hash = ?",
                vec![text(token_hash)],
                map_token,
            )
            .await
    }

    /// Count of live (unexpired, unrevoked) tokens in a family.
    pub async fn live_in_family(
        &self,
        ctx: &QueryContext,
        family: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count: Option<i64> = self
            .db
            .query_opt(
                ctx,
                "SELECT COUNT(*) FROM refresh_tokens \
                 WHERE token_id = ? AND revoked_at IS NULL AND expires_at > ?",
                vec![text(family.to_string()), text(fmt_time(now))],
                |row| row.get(0),
            )
            .await?;
        Ok(count.unwrap_or(0) as u32)
    }
}

fn map_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        id: get_uuid(row, 0)?,
        user_id: get_uuid(row, 1)?,
        token_hash: row.get(2)?,
        token_id: get_uuid(row, 3)?,
        expires_at: get_time(row, 4)?,
        revoked_at: get_opt_time(row, 5)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn repo() -> RefreshTokenRepo {
        RefreshTokenRepo::new(Database::open_in_memory().unwrap())
    }

    fn ctx() -> QueryContext {
        QueryContext::new("tokens-test")
    }

    fn record(user: Uuid, family: Uuid, hash: &str, ttl_hours: i64) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: user,
            token_hash: hash.into(),
            token_id: family,
            expires_at: Utc::now() + ChronoDuration::hours(ttl_hours),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn rotation_revokes_old_and_stores_new() {
        let repo = repo();
        let user = Uuid::new_v4();
        let family = Uuid::new_v4();
        repo.insert(&ctx(), &record(user, family, "hash-1", 24))
            .await
            .unwrap();

        let outcome = repo
            .rotate(&ctx(), "hash-1", Utc::now(), &record(user, family, "hash-2", 24))
            .await
            .unwrap();
        assert_eq!(outcome.user_id, user);

        let old = repo.by_hash(&ctx(), "hash-1").await.unwrap().unwrap();
        assert!(old.revoked_at.is_some());
        let new = repo.by_hash(&ctx(), "hash-2").await.unwrap().unwrap();
        assert!(new.revoked_at.is_none());
        assert_eq!(new.token_id, family, "family survives rotation");
    }

    #[tokio::test]
    async fn reuse_invalidates_the_whole_family() {
        let repo = repo();
        let user = Uuid::new_v4();
        let family = Uuid::new_v4();
        repo.insert(&ctx(), &record(user, family, "hash-1", 24))
            .await
            .unwrap();

        // Legitimate rotation: hash-1 → hash-2.
        repo.rotate(&ctx(), "hash-1", Utc::now(), &record(user, family, "hash-2", 24))
            .await
            .unwrap();

        // An attacker replays hash-1. The live hash-2 must die with it.
        let err = repo
            .rotate(&ctx(), "hash-1", Utc::now(), &record(user, family, "hash-3", 24))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TokenReused));

        assert_eq!(
            repo.live_in_family(&ctx(), family, Utc::now()).await.unwrap(),
            0,
            "no sibling survives a reuse"
        );
        let stolen_rotation = repo
            .rotate(&ctx(), "hash-2", Utc::now(), &record(user, family, "hash-4", 24))
            .await;
        assert!(stolen_rotation.is_err(), "revoked sibling cannot rotate");
    }

    #[tokio::test]
    async fn expired_token_reads_as_not_found() {
        let repo = repo();
        let user = Uuid::new_v4();
        let family = Uuid::new_v4();
        repo.insert(&ctx(), &record(user, family, "hash-old", -1))
            .await
            .unwrap();
        let err = repo
            .rotate(&ctx(), "hash-old", Utc::now(), &record(user, family, "hash-new", 24))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let repo = repo();
        let err = repo
            .rotate(
                &ctx(),
                "never-issued",
                Utc::now(),
                &record(Uuid::new_v4(), Uuid::new_v4(), "x", 24),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let repo = repo();
        let user = Uuid::new_v4();
        repo.insert(&ctx(), &record(user, Uuid::new_v4(), "hash-1", 24))
            .await
            .unwrap();
        repo.revoke(&ctx(), "hash-1", Utc::now()).await.unwrap();
        repo.revoke(&ctx(), "hash-1", Utc::now()).await.unwrap();
        repo.revoke(&ctx(), "missing", Utc::now()).await.unwrap();
    }
}
