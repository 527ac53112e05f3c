// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::QueryContext;
use crate::db::{integer, opt_text, text, Database};
use crate::error::StoreError;

use super::{fmt_time, get_json, get_opt_time, get_time, get_uuid};

/// Lifecycle of a generation job. `Dead` is the dead-letter state after
/// attempt exhaustion; terminal states always carry a result or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Dead,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Dead | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
            Self::Canceled => "canceled",
        }
    }

    fn parse(s: &str, idx: usize) -> rusqlite::Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            "canceled" => Ok(Self::Canceled),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("unknown job status {other:?}").into(),
            )),
        }
    }
}

/// Durable job record. The pipeline owns these rows; handlers only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiJobRecord {
    pub id: Uuid,
    pub kind: String,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub payload: serde_json::Value,
    /// sha256(kind, session, payload) — duplicate submits within the
    /// idempotency window resolve to the same job.
    pub idempotency_key: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct AiJobRepo {
    db: Arc<Database>,
}

impl AiJobRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, ctx: &QueryContext, job: &AiJobRecord) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "INSERT INTO ai_jobs (id, kind, session_id, user_id, payload, idempotency_key, \
                 status, attempts, max_attempts, next_attempt_at, result, error, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(job.id.to_string()),
                    text(&job.kind),
                    text(job.session_id.to_string()),
                    text(job.user_id.to_string()),
                    text(job.payload.to_string()),
                    text(&job.idempotency_key),
                    text(job.status.as_str()),
                    integer(i64::from(job.attempts)),
                    integer(i64::from(job.max_attempts)),
                    opt_text(job.next_attempt_at.map(fmt_time)),
                    opt_text(job.result.clone()),
                    opt_text(job.error.clone()),
                    text(fmt_time(job.created_at)),
                    text(fmt_time(job.updated_at)),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn by_id(
        &self,
        ctx: &QueryContext,
        id: Uuid,
    ) -> Result<Option<AiJobRecord>, StoreError> {
        self.db
            .query_opt(
                ctx,
                &format!("SELECT {COLUMNS} FROM ai_jobs WHERE id = ?"),
                vec![text(id.to_string())],
                map_job,
            )
            .await
    }

    /// Find a non-dead duplicate submitted after `since`.
    pub async fn by_idempotency_key(
        &self,
        ctx: &QueryContext,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AiJobRecord>, StoreError> {
        self.db
            .query_opt(
                ctx,
                &format!(
                    "SELECT {COLUMNS} FROM ai_jobs WHERE idempotency_key = ? \
                     AND created_at > ? AND status != 'dead' AND status != 'canceled' \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                vec![text(key), text(fmt_time(since))],
                map_job,
            )
            .await
    }

    /// Queued jobs whose next attempt is due, oldest first.
    pub async fn due(
        &self,
        ctx: &QueryContext,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<AiJobRecord>, StoreError> {
        self.db
            .query_all(
                ctx,
                &format!(
                    "SELECT {COLUMNS} FROM ai_jobs WHERE status = 'queued' \
                     AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
                     ORDER BY created_at LIMIT ?"
                ),
                vec![text(fmt_time(now)), integer(i64::from(limit))],
                map_job,
            )
            .await
    }

    /// Claim a queued job: queued → running, attempts += 1. Returns `false`
    /// when the job was concurrently claimed, canceled or finished.
    pub async fn mark_running(&self, ctx: &QueryContext, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .db
            .execute(
                ctx,
                "UPDATE ai_jobs SET status = 'running', attempts = attempts + 1, updated_at = ? \
                 WHERE id = ? AND status = 'queued'",
                vec![text(fmt_time(Utc::now())), text(id.to_string())],
            )
            .await?;
        Ok(changed > 0)
    }

    pub async fn complete(
        &self,
        ctx: &QueryContext,
        id: Uuid,
        result: &str,
    ) -> Result<(), StoreError> {
        self.transition(ctx, id, JobStatus::Succeeded, Some(result), None, None)
            .await
    }

    pub async fn fail(&self, ctx: &QueryContext, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.transition(ctx, id, JobStatus::Failed, None, Some(error), None)
            .await
    }

    pub async fn mark_dead(
        &self,
        ctx: &QueryContext,
        id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        self.transition(ctx, id, JobStatus::Dead, None, Some(error), None)
            .await
    }

    /// Push a transiently-failed job back to the queue with its next
    /// attempt time.
    pub async fn schedule_retry(
        &self,
        ctx: &QueryContext,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.transition(
            ctx,
            id,
            JobStatus::Queued,
            None,
            Some(error),
            Some(next_attempt_at),
        )
        .await
    }

    /// Cancel a job unless it already reached a terminal state. Returns
    /// the status after the call.
    pub async fn cancel(&self, ctx: &QueryContext, id: Uuid) -> Result<JobStatus, StoreError> {
        self.db
            .execute(
                ctx,
                "UPDATE ai_jobs SET status = 'canceled', updated_at = ? \
                 WHERE id = ? AND (status = 'queued' OR status = 'running')",
                vec![text(fmt_time(Utc::now())), text(id.to_string())],
            )
            .await?;
        let job = self
            .by_id(ctx, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "job" })?;
        Ok(job.status)
    }

    async fn transition(
        &self,
        ctx: &QueryContext,
        id: Uuid,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let changed = self
            .db
            .execute(
                ctx,
                "UPDATE ai_jobs SET status = ?, result = COALESCE(?, result), \
                 error = ?, next_attempt_at = ?, updated_at = ? WHERE id = ?",
                vec![
                    text(status.as_str()),
                    opt_text(result.map(str::to_string)),
                    opt_text(error.map(str::to_string)),
                    opt_text(next_attempt_at.map(fmt_time)),
                    text(fmt_time(Utc::now())),
                    text(id.to_string()),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity: "job" });
        }
        Ok(())
    }
}

const COLUMNS: &str = "id, kind, session_id, user_id, payload, idempotency_key, status, attempts, \
     max_attempts, next_attempt_at, result, error, created_at, updated_at";

fn map_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<AiJobRecord> {
    let status: String = row.get(6)?;
    Ok(AiJobRecord {
        id: get_uuid(row, 0)?,
        kind: row.get(1)?,
        session_id: get_uuid(row, 2)?,
        user_id: get_uuid(row, 3)?,
        payload: get_json(row, 4)?,
        idempotency_key: row.get(5)?,
        status: JobStatus::parse(&status, 6)?,
        attempts: row.get::<_, i64>(7)? as u32,
        max_attempts: row.get::<_, i64>(8)? as u32,
        next_attempt_at: get_opt_time(row, 9)?,
        result: row.get(10)?,
        error: row.get(11)?,
        created_at: get_time(row, 12)?,
        updated_at: get_time(row, 13)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn repo() -> AiJobRepo {
        AiJobRepo::new(Database::open_in_memory().unwrap())
    }

    fn ctx() -> QueryContext {
        QueryContext::new("jobs-test")
    }

    fn job(kind: &str) -> AiJobRecord {
        let now = Utc::now();
        AiJobRecord {
            id: Uuid::new_v4(),
            kind: kind.into(),
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            payload: serde_json::json!({"name": "Old Marrow"}),
            idempotency_key: format!("key-{}", Uuid::new_v4()),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: 5,
            next_attempt_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_claim() {
        let repo = repo();
        let j = job("npc_dialogue");
        repo.insert(&ctx(), &j).await.unwrap();

        assert!(repo.mark_running(&ctx(), j.id).await.unwrap());
        let claimed = repo.by_id(&ctx(), j.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);

        // A second claim must lose: the row is no longer queued.
        assert!(!repo.mark_running(&ctx(), j.id).await.unwrap());
    }

    #[tokio::test]
    async fn due_respects_next_attempt_time() {
        let repo = repo();
        let now = Utc::now();

        let ready = job("narration");
        repo.insert(&ctx(), &ready).await.unwrap();

        let mut later = job("narration");
        later.next_attempt_at = Some(now + ChronoDuration::seconds(60));
        repo.insert(&ctx(), &later).await.unwrap();

        let due = repo.due(&ctx(), now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ready.id);

        let due_later = repo
            .due(&ctx(), now + ChronoDuration::seconds(61), 10)
            .await
            .unwrap();
        assert_eq!(due_later.len(), 2);
    }

    #[tokio::test]
    async fn retry_cycle_reaches_success() {
        let repo = repo();
        let j = job("culture");
        repo.insert(&ctx(), &j).await.unwrap();

        repo.mark_running(&ctx(), j.id).await.unwrap();
        repo.schedule_retry(&ctx(), j.id, Utc::now(), "upstream error")
            .await
            .unwrap();
        let retried = repo.by_id(&ctx(), j.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.error.as_deref(), Some("upstream error"));

        repo.mark_running(&ctx(), j.id).await.unwrap();
        repo.complete(&ctx(), j.id, "\"a weathered culture of cliff-dwellers\"")
            .await
            .unwrap();
        let done = repo.by_id(&ctx(), j.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.attempts, 2);
        assert!(done.result.is_some());
        assert!(done.status.is_terminal());
    }

    #[tokio::test]
    async fn dead_letter_keeps_the_error() {
        let repo = repo();
        let j = job("faction");
        repo.insert(&ctx(), &j).await.unwrap();
        repo.mark_dead(&ctx(), j.id, "exhausted 5 attempts").await.unwrap();
        let dead = repo.by_id(&ctx(), j.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.error.as_deref(), Some("exhausted 5 attempts"));
    }

    #[tokio::test]
    async fn idempotency_key_finds_recent_duplicate() {
        let repo = repo();
        let j = job("settlement");
        repo.insert(&ctx(), &j).await.unwrap();

        let hit = repo
            .by_idempotency_key(
                &ctx(),
                &j.idempotency_key,
                Utc::now() - ChronoDuration::seconds(60),
            )
            .await
            .unwrap();
        assert_eq!(hit.unwrap().id, j.id);

        // Outside the window the duplicate is ignored.
        let stale = repo
            .by_idempotency_key(
                &ctx(),
                &j.idempotency_key,
                Utc::now() + ChronoDuration::seconds(1),
            )
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn cancel_only_touches_live_jobs() {
        let repo = repo();
        let j = job("backstory");
        repo.insert(&ctx(), &j).await.unwrap();
        assert_eq!(repo.cancel(&ctx(), j.id).await.unwrap(), JobStatus::Canceled);

        let done = job("backstory");
        repo.insert(&ctx(), &done).await.unwrap();
        repo.mark_running(&ctx(), done.id).await.unwrap();
        repo.complete(&ctx(), done.id, "\"orphan of the salt wars\"")
            .await
            .unwrap();
        assert_eq!(
            repo.cancel(&ctx(), done.id).await.unwrap(),
            JobStatus::Succeeded,
            "terminal jobs are not cancelable"
        );
    }
}
