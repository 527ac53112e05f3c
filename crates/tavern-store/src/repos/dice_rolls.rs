// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tavern_core::dice::DiceRoll;
use uuid::Uuid;

use crate::context::QueryContext;
use crate::db::{integer, opt_text, text, Database};
use crate::error::StoreError;
use crate::page::{Cursor, PageRequest, PageResult};

use super::{fmt_time, get_json, get_opt_uuid, get_time, get_uuid};

const COLUMNS: &str =
    "id, session_id, user_id, character_id, notation, results, modifier, total, purpose, seed, created_at";

/// Append-only audit log of every roll. Not cached: the list is read right
/// after writes and correctness beats the memoization win.
pub struct DiceRollRepo {
    db: Arc<Database>,
}

impl DiceRollRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, ctx: &QueryContext, roll: &DiceRoll) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "INSERT INTO dice_rolls (id, session_id, user_id, character_id, notation, results, \
                 modifier, total, purpose, seed, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(roll.id.to_string()),
                    opt_text(roll.session_id.map(|s| s.to_string())),
                    text(roll.user_id.to_string()),
                    opt_text(roll.character_id.map(|c| c.to_string())),
                    text(&roll.notation),
                    text(super::to_json(&roll.results)),
                    integer(roll.modifier),
                    integer(roll.total),
                    text(&roll.purpose),
                    // u64 seeds can exceed i64; stored as text.
                    text(roll.seed.to_string()),
                    text(fmt_time(roll.rolled_at)),
                ],
            )
            .await?;
        Ok(())
    }

    /// Session roll history, oldest first. Cursor form is keyset-paginated
    /// on (created_at, id) so the ordering holds while new rolls land.
    pub async fn list_by_session(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
        page: &PageRequest,
    ) -> Result<PageResult<DiceRoll>, StoreError> {
        let limit = page.limit();
        let rows = match page {
            PageRequest::Offset { .. } => {
                self.db
                    .query_all(
                        ctx,
                        &format!(
                            "SELECT {COLUMNS} FROM dice_rolls WHERE session_id = ? \
                             ORDER BY created_at, id LIMIT ? OFFSET ?"
                        ),
                        vec![
                            text(session_id.to_string()),
                            integer(i64::from(limit) + 1),
                            integer(i64::from(page.offset())),
                        ],
                        map_roll,
                    )
                    .await?
            }
            PageRequest::Cursor { after, .. } => {
                let cursor = after.as_deref().map(Cursor::decode).transpose()?;
                match cursor {
                    Some(c) => {
                        self.db
                            .query_all(
                                ctx,
                                &format!(
                                    "SELECT {COLUMNS} FROM dice_rolls WHERE session_id = ? \
                                     AND (created_at, id) > (?, ?) ORDER BY created_at, id LIMIT ?"
                                ),
                                vec![
                                    text(session_id.to_string()),
                                    text(fmt_time(c.created_at)),
                                    text(c.id.to_string()),
                                    integer(i64::from(limit) + 1),
                                ],
                                map_roll,
                            )
                            .await?
                    }
                    None => {
                        self.db
                            .query_all(
                                ctx,
                                &format!(
                                    "SELECT {COLUMNS} FROM dice_rolls WHERE session_id = ? \
                                     ORDER BY created_at, id LIMIT ?"
                                ),
                                vec![text(session_id.to_string()), integer(i64::from(limit) + 1)],
                                map_roll,
                            )
                            .await?
                    }
                }
            }
        };

        Ok(PageResult::from_overfetch(rows, limit, |r| Cursor {
            created_at: r.rolled_at,
            id: r.id,
        }))
    }
}

fn map_roll(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiceRoll> {
    let seed: String = row.get(9)?;
    Ok(DiceRoll {
        id: get_uuid(row, 0)?,
        session_id: get_opt_uuid(row, 1)?,
        user_id: get_uuid(row, 2)?,
        character_id: get_opt_uuid(row, 3)?,
        notation: row.get(4)?,
        results: get_json(row, 5)?,
        modifier: row.get(6)?,
        total: row.get(7)?,
        purpose: row.get(8)?,
        seed: seed.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        unlogged: false,
        rolled_at: get_time(row, 10)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;

    fn repo() -> DiceRollRepo {
        DiceRollRepo::new(Database::open_in_memory().unwrap())
    }

    fn ctx() -> QueryContext {
        QueryContext::new("dice-test")
    }

    fn roll(session: Uuid, offset_secs: i64, total: i64) -> DiceRoll {
        DiceRoll {
            id: Uuid::new_v4(),
            session_id: Some(session),
            user_id: Uuid::new_v4(),
            character_id: None,
            notation: "2d6+3".into(),
            results: vec![4, 5],
            modifier: 3,
            total,
            purpose: "attack".into(),
            seed: u64::MAX - 7,
            unlogged: false,
            rolled_at: Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn insert_preserves_results_and_seed() {
        let repo = repo();
        let session = Uuid::new_v4();
        let r = roll(session, 0, 12);
        repo.insert(&ctx(), &r).await.unwrap();

        let page = repo
            .list_by_session(&ctx(), session, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].results, vec![4, 5]);
        assert_eq!(page.items[0].seed, u64::MAX - 7);
        assert_eq!(page.items[0].total, 12);
    }

    #[tokio::test]
    async fn cursor_pages_walk_in_order() {
        let repo = repo();
        let session = Uuid::new_v4();
        for i in 0..5 {
            repo.insert(&ctx(), &roll(session, i, 10 + i)).await.unwrap();
        }

        let first = repo
            .list_by_session(
                &ctx(),
                session,
                &PageRequest::Cursor {
                    after: None,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next_cursor.expect("more pages exist");

        let second = repo
            .list_by_session(
                &ctx(),
                session,
                &PageRequest::Cursor {
                    after: Some(token),
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[0].total, 12, "keyset continues after page 1");
        let token = second.next_cursor.expect("one more page");

        let last = repo
            .list_by_session(
                &ctx(),
                session,
                &PageRequest::Cursor {
                    after: Some(token),
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn other_sessions_are_invisible() {
        let repo = repo();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        repo.insert(&ctx(), &roll(a, 0, 9)).await.unwrap();
        let page = repo
            .list_by_session(&ctx(), b, &PageRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }
}
