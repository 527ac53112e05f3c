// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::Utc;
use tavern_core::{GameSession, JoinCode, Participant, SessionStatus, StateBag};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::context::QueryContext;
use crate::db::{integer, opt_text, text, Database, Params};
use crate::error::StoreError;
use crate::page::PageRequest;

use super::{fmt_time, get_json, get_opt_time, get_opt_uuid, get_time, get_uuid, to_json};

const REPO: &str = "sessions";
const READS: &[&str] = &["by_id", "by_join_code", "participants"];

const COLUMNS: &str =
    "id, name, director_id, status, max_participants, join_code, state, created_at, ended_at";

pub struct SessionRepo {
    db: Arc<Database>,
    cache: Arc<ResponseCache>,
}

impl SessionRepo {
    pub fn new(db: Arc<Database>, cache: Arc<ResponseCache>) -> Self {
        Self { db, cache }
    }

    pub async fn create(&self, ctx: &QueryContext, s: &GameSession) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "INSERT INTO game_sessions (id, name, director_id, status, max_participants, \
                 join_code, state, created_at, ended_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                session_params(s),
            )
            .await
            .map_err(|e| match e {
                StoreError::Database(msg) if msg.contains("UNIQUE") => {
                    StoreError::Conflict("join code already in use".into())
                }
                other => other,
            })?;
        self.cache.invalidate(REPO, READS);
        Ok(())
    }

    /// Persist status, state bag and ended timestamp — the mutable surface
    /// of a session.
    pub async fn update(&self, ctx: &QueryContext, s: &GameSession) -> Result<(), StoreError> {
        let changed = self
            .db
            .execute(
                ctx,
                "UPDATE game_sessions SET status = ?, state = ?, ended_at = ? WHERE id = ?",
                vec![
                    text(status_str(s.status)),
                    text(to_json(&s.state)),
                    opt_text(s.ended_at.map(fmt_time)),
                    text(s.id.to_string()),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity: "session" });
        }
        self.cache.invalidate(REPO, READS);
        Ok(())
    }

    pub async fn by_id(
        &self,
        ctx: &QueryContext,
        id: Uuid,
    ) -> Result<Option<GameSession>, StoreError> {
        let db = self.db.clone();
        let ctx = ctx.clone();
        self.cache
            .get_or_load(REPO, "by_id", &id, None, None, move || async move {
                db.query_opt(
                    &ctx,
                    &format!("SELECT {COLUMNS} FROM game_sessions WHERE id = ?"),
                    vec![text(id.to_string())],
                    map_session,
                )
                .await
            })
            .await
    }

    /// Join-code lookup considers live sessions only — ended sessions free
    /// their code for reuse.
    pub async fn by_join_code(
        &self,
        ctx: &QueryContext,
        code: &JoinCode,
    ) -> Result<Option<GameSession>, StoreError> {
        let db = self.db.clone();
        let ctx = ctx.clone();
        let code_str = code.as_str().to_string();
        self.cache
            .get_or_load(REPO, "by_join_code", &code_str.clone(), None, None, move || {
                let code_str = code_str.clone();
                async move {
                    db.query_opt(
                        &ctx,
                        &format!(
                            "SELECT {COLUMNS} FROM game_sessions WHERE join_code = ? AND status != 'ended'"
                        ),
                        vec![text(code_str)],
                        map_session,
                    )
                    .await
                }
            })
            .await
    }

    /// Offset-paged listing by status, newest first.
    pub async fn list_by_status(
        &self,
        ctx: &QueryContext,
        status: SessionStatus,
        page: &PageRequest,
    ) -> Result<Vec<GameSession>, StoreError> {
        self.db
            .query_all(
                ctx,
                &format!(
                    "SELECT {COLUMNS} FROM game_sessions WHERE status = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
                ),
                vec![
                    text(status_str(status)),
                    integer(i64::from(page.limit())),
                    integer(i64::from(page.offset())),
                ],
                map_session,
            )
            .await
    }

    // ── Participants ──────────────────────────────────────────────────────────

    /// Admit a participant, enforcing capacity and uniqueness atomically.
    /// The count, the capacity check and the insert run in one transaction
    /// so two racing joins cannot both squeeze into the last seat.
    pub async fn add_participant(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
        user_id: Uuid,
        character_id: Option<Uuid>,
    ) -> Result<Participant, StoreError> {
        let joined_at = Utc::now();
        let result = self
            .db
            .with_tx(ctx, |tx| {
                let session = tx
                    .query_opt(
                        "SELECT status, max_participants FROM game_sessions WHERE id = ?",
                        vec![text(session_id.to_string())],
                        |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                        },
                    )?
                    .ok_or(StoreError::NotFound { entity: "session" })?;
                let (status, max_participants) = session;
                if status == "ended" {
                    return Err(StoreError::NotFound { entity: "session" });
                }

                let count: i64 = tx
                    .query_opt(
                        "SELECT COUNT(*) FROM game_participants WHERE session_id = ?",
                        vec![text(session_id.to_string())],
                        |row| row.get(0),
                    )?
                    .unwrap_or(0);
                if count >= max_participants {
                    return Err(StoreError::Conflict("session is full".into()));
                }

                let already: Option<i64> = tx.query_opt(
                    "SELECT 1 FROM game_participants WHERE session_id = ? AND user_id = ?",
                    vec![text(session_id.to_string()), text(user_id.to_string())],
                    |row| row.get(0),
                )?;
                if already.is_some() {
                    return Err(StoreError::Conflict("already joined".into()));
                }

                tx.execute(
                    "INSERT INTO game_participants (session_id, user_id, character_id, online, joined_at) \
                     VALUES (?, ?, ?, ?, ?)",
                    vec![
                        text(session_id.to_string()),
                        text(user_id.to_string()),
                        opt_text(character_id.map(|c| c.to_string())),
                        integer(0),
                        text(fmt_time(joined_at)),
                    ],
                )?;
                Ok(Participant {
                    session_id,
                    user_id,
                    character_id,
                    online: false,
                    joined_at,
                })
            })
            .await?;
        self.cache.invalidate(REPO, READS);
        Ok(result)
    }

    pub async fn remove_participant(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        let changed = self
            .db
            .execute(
                ctx,
                "DELETE FROM game_participants WHERE session_id = ? AND user_id = ?",
                vec![text(session_id.to_string()), text(user_id.to_string())],
            )
            .await?;
        self.cache.invalidate(REPO, READS);
        Ok(changed > 0)
    }

    pub async fn set_online(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
        user_id: Uuid,
        online: bool,
    ) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "UPDATE game_participants SET online = ? WHERE session_id = ? AND user_id = ?",
                vec![
                    integer(i64::from(online)),
                    text(session_id.to_string()),
                    text(user_id.to_string()),
                ],
            )
            .await?;
        self.cache.invalidate(REPO, &["participants"]);
        Ok(())
    }

    pub async fn participants(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
    ) -> Result<Vec<Participant>, StoreError> {
        let db = self.db.clone();
        let ctx = ctx.clone();
        self.cache
            .get_or_load(
                REPO,
                "participants",
                &session_id,
                None,
                None,
                move || async move {
                    db.query_all(
                        &ctx,
                        "SELECT session_id, user_id, character_id, online, joined_at \
                         FROM game_participants WHERE session_id = ? ORDER BY joined_at, user_id",
                        vec![text(session_id.to_string())],
                        map_participant,
                    )
                    .await
                },
            )
            .await
    }

    pub async fn participant_count(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
    ) -> Result<u32, StoreError> {
        let count: Option<i64> = self
            .db
            .query_opt(
                ctx,
                "SELECT COUNT(*) FROM game_participants WHERE session_id = ?",
                vec![text(session_id.to_string())],
                |row| row.get(0),
            )
            .await?;
        Ok(count.unwrap_or(0) as u32)
    }
}

fn session_params(s: &GameSession) -> Params {
    vec![
        text(s.id.to_string()),
        text(&s.name),
        text(s.director_id.to_string()),
        text(status_str(s.status)),
        integer(i64::from(s.max_participants)),
        text(s.join_code.as_str()),
        text(to_json(&s.state)),
        text(fmt_time(s.created_at)),
        opt_text(s.ended_at.map(fmt_time)),
    ]
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Active => "active",
        SessionStatus::Paused => "paused",
        SessionStatus::Ended => "ended",
    }
}

fn parse_status(s: &str, idx: usize) -> rusqlite::Result<SessionStatus> {
    match s {
        "pending" => Ok(SessionStatus::Pending),
        "active" => Ok(SessionStatus::Active),
        "paused" => Ok(SessionStatus::Paused),
        "ended" => Ok(SessionStatus::Ended),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown session status {other:?}").into(),
        )),
    }
}

fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameSession> {
    let status: String = row.get(3)?;
    let state: StateBag = get_json(row, 6)?;
    Ok(GameSession {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        director_id: get_uuid(row, 2)?,
        status: parse_status(&status, 3)?,
        max_participants: row.get::<_, i64>(4)? as u32,
        join_code: JoinCode::parse(&row.get::<_, String>(5)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.to_string().into(),
            )
        })?,
        state,
        created_at: get_time(row, 7)?,
        ended_at: get_opt_time(row, 8)?,
    })
}

fn map_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        session_id: get_uuid(row, 0)?,
        user_id: get_uuid(row, 1)?,
        character_id: get_opt_uuid(row, 2)?,
        online: row.get::<_, i64>(3)? != 0,
        joined_at: get_time(row, 4)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
