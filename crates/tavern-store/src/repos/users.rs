// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::QueryContext;
use crate::db::{text, Database, Params};
use crate::error::StoreError;

use super::{fmt_time, get_time, get_uuid};

/// An account row. The password hash is bcrypt output and never leaves the
/// auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub struct UserRepo {
    db: Arc<Database>,
}

impl UserRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, ctx: &QueryContext, user: &User) -> Result<(), StoreError> {
        let params: Params = vec![
            text(user.id.to_string()),
            text(&user.username),
            text(&user.email),
            text(&user.password_hash),
            text(fmt_time(user.created_at)),
        ];
        self.db
            .execute(
                ctx,
                "INSERT INTO users (id, username, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
                params,
            )
            .await
            .map_err(|e| match e {
                StoreError::Database(msg) if msg.contains("UNIQUE") => {
                    StoreError::Conflict("username already taken".into())
                }
                other => other,
            })?;
        Ok(())
    }

    pub async fn by_username(
        &self,
        ctx: &QueryContext,
        username: &str,
    ) -> Result<Option<User>, StoreError> {
        self.db
            .query_opt(
                ctx,
                "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?",
                vec![text(username)],
                map_user,
            )
            .await
    }

    pub async fn by_id(&self, ctx: &QueryContext, id: Uuid) -> Result<Option<User>, StoreError> {
        self.db
            .query_opt(
                ctx,
                "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?",
                vec![text(id.to_string())],
                map_user,
            )
            .await
    }
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: get_uuid(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: get_time(row, 4)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
