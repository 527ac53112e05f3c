// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The embedded store.
//!
//! SQLite behind an async mutex. Every statement goes through the rebind
//! path and the query log; `max_open` from the pool settings is enforced
//! with a semaphore so the embedded store honors the same concurrency
//! discipline a server store would. The schema is versioned through
//! `PRAGMA user_version` — a version mismatch drops and recreates the
//! tables (raw game history is recoverable from the event log upstream;
//! the store is not the system of record for anything irreplaceable in
//! development, and production migrations are handled out of process).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::context::QueryContext;
use crate::error::StoreError;
use crate::pool::{PoolHealth, PoolSettings};
use crate::rebind::{rebind, Dialect};

/// Positional query arguments. Values only — the query log records arity,
/// never content.
pub type Params = Vec<rusqlite::types::Value>;

/// Text parameter.
pub fn text(s: impl Into<String>) -> rusqlite::types::Value {
    rusqlite::types::Value::Text(s.into())
}

/// Nullable text parameter.
pub fn opt_text(s: Option<String>) -> rusqlite::types::Value {
    match s {
        Some(s) => rusqlite::types::Value::Text(s),
        None => rusqlite::types::Value::Null,
    }
}

/// Integer parameter.
pub fn integer(i: i64) -> rusqlite::types::Value {
    rusqlite::types::Value::Integer(i)
}

const SCHEMA_VERSION: i32 = 1;

pub struct Database {
    conn: tokio::sync::Mutex<Connection>,
    permits: tokio::sync::Semaphore,
    dialect: Dialect,
    health: Arc<PoolHealth>,
}

impl Database {
    pub fn open(path: &Path, settings: &PoolSettings) -> Result<Arc<Self>, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Database(format!("open {}: {e}", path.display())))?;
        Self::from_connection(conn, settings)
    }

    pub fn open_in_memory() -> Result<Arc<Self>, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, &PoolSettings::default())
    }

    fn from_connection(conn: Connection, settings: &PoolSettings) -> Result<Arc<Self>, StoreError> {
        init_schema(&conn)?;
        Ok(Arc::new(Self {
            conn: tokio::sync::Mutex::new(conn),
            permits: tokio::sync::Semaphore::new(settings.max_open.max(1) as usize),
            dialect: Dialect::Sqlite,
            health: Arc::new(PoolHealth::default()),
        }))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn health(&self) -> Arc<PoolHealth> {
        self.health.clone()
    }

    /// Run one write statement; returns the affected row count.
    pub async fn execute(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: Params,
    ) -> Result<usize, StoreError> {
        ctx.check_deadline()?;
        let (effective, arity) = rebind(self.dialect, sql)?;
        let _permit = self.acquire().await?;
        let conn = self.conn.lock().await;
        let started = Instant::now();
        let rows = conn.execute(&effective, rusqlite::params_from_iter(params))?;
        log_query(ctx, &effective, arity, started);
        Ok(rows)
    }

    /// Run a read returning at most one row.
    pub async fn query_opt<T>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: Params,
        map: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, StoreError> {
        ctx.check_deadline()?;
        let (effective, arity) = rebind(self.dialect, sql)?;
        let _permit = self.acquire().await?;
        let conn = self.conn.lock().await;
        let started = Instant::now();
        let mut stmt = conn.prepare(&effective)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let result = match rows.next()? {
            Some(row) => Some(map(row)?),
            None => None,
        };
        log_query(ctx, &effective, arity, started);
        Ok(result)
    }

    /// Run a read returning every row, mapped.
    pub async fn query_all<T>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: Params,
        mut map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StoreError> {
        ctx.check_deadline()?;
        let (effective, arity) = rebind(self.dialect, sql)?;
        let _permit = self.acquire().await?;
        let conn = self.conn.lock().await;
        let started = Instant::now();
        let mut stmt = conn.prepare(&effective)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        log_query(ctx, &effective, arity, started);
        Ok(out)
    }

    /// Run several statements atomically. The closure receives a
    /// [`TxExecutor`] so transactional statements keep the rebind and
    /// query-log discipline; any error rolls the transaction back.
    pub async fn with_tx<T>(
        &self,
        ctx: &QueryContext,
        f: impl FnOnce(&TxExecutor<'_, '_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        ctx.check_deadline()?;
        let _permit = self.acquire().await?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let exec = TxExecutor {
            tx: &tx,
            dialect: self.dialect,
            ctx,
        };
        match f(&exec) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back; make it explicit.
                if let Err(rb) = tx.rollback() {
                    warn!(correlation_id = %ctx.correlation_id, "rollback failed: {rb}");
                }
                Err(e)
            }
        }
    }

    /// Liveness probe: `SELECT 1`, recorded in the pool health state.
    pub async fn probe(&self) -> bool {
        let ok = match self.conn.try_lock() {
            Ok(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            // A held lock means the store is busy, not broken.
            Err(_) => true,
        };
        self.health.record_probe(ok);
        ok
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, StoreError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| StoreError::Database("connection pool closed".into()))
    }
}

/// Statement surface inside [`Database::with_tx`].
pub struct TxExecutor<'tx, 'ctx> {
    tx: &'tx rusqlite::Transaction<'tx>,
    dialect: Dialect,
    ctx: &'ctx QueryContext,
}

impl TxExecutor<'_, '_> {
    pub fn execute(&self, sql: &str, params: Params) -> Result<usize, StoreError> {
        let (effective, arity) = rebind(self.dialect, sql)?;
        let started = Instant::now();
        let rows = self
            .tx
            .execute(&effective, rusqlite::params_from_iter(params))?;
        log_query(self.ctx, &effective, arity, started);
        Ok(rows)
    }

    pub fn query_opt<T>(
        &self,
        sql: &str,
        params: Params,
        map: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, StoreError> {
        let (effective, arity) = rebind(self.dialect, sql)?;
        let started = Instant::now();
        let mut stmt = self.tx.prepare(&effective)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let result = match rows.next()? {
            Some(row) => Some(map(row)?),
            None => None,
        };
        log_query(self.ctx, &effective, arity, started);
        Ok(result)
    }
}

fn log_query(ctx: &QueryContext, effective_sql: &str, arity: usize, started: Instant) {
    debug!(
        correlation_id = %ctx.correlation_id,
        sql = %effective_sql,
        args = arity,
        elapsed_us = started.elapsed().as_micros() as u64,
        "query"
    );
}

// ── Schema ────────────────────────────────────────────────────────────────────

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // The bundled sqlite build compiles with SQLITE_DEFAULT_FOREIGN_KEYS=1;
    // none of the call sites here insert parents before children, so keep
    // enforcement off to match every other sqlite default.
    conn.execute("PRAGMA foreign_keys = OFF", [])?;
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current != 0 && current != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            email         TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS characters (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL,
            name             TEXT NOT NULL,
            race             TEXT NOT NULL,
            class            TEXT NOT NULL,
            level            INTEGER NOT NULL,
            current_hp       INTEGER NOT NULL,
            max_hp           INTEGER NOT NULL,
            armor_class      INTEGER NOT NULL,
            abilities        TEXT NOT NULL,
            initiative_bonus INTEGER NOT NULL,
            speed            INTEGER NOT NULL,
            proficiencies    TEXT NOT NULL,
            equipment        TEXT NOT NULL,
            spell_slots      TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS game_sessions (
            id               TEXT PRIMARY KEY,
            name             TEXT NOT NULL,
            director_id      TEXT NOT NULL,
            status           TEXT NOT NULL,
            max_participants INTEGER NOT NULL,
            join_code        TEXT NOT NULL,
            state            TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            ended_at         TEXT,
            FOREIGN KEY (director_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS game_participants (
            session_id   TEXT NOT NULL,
            user_id      TEXT NOT NULL,
            character_id TEXT,
            online       INTEGER NOT NULL DEFAULT 0,
            joined_at    TEXT NOT NULL,
            PRIMARY KEY (session_id, user_id),
            FOREIGN KEY (session_id) REFERENCES game_sessions(id)
        );

        CREATE TABLE IF NOT EXISTS dice_rolls (
            id           TEXT PRIMARY KEY,
            session_id   TEXT,
            user_id      TEXT NOT NULL,
            character_id TEXT,
            notation     TEXT NOT NULL,
            results      TEXT NOT NULL,
            modifier     INTEGER NOT NULL,
            total        INTEGER NOT NULL,
            purpose      TEXT NOT NULL,
            seed         TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            token_id   TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            revoked_at TEXT
        );

        CREATE TABLE IF NOT EXISTS ai_jobs (
            id              TEXT PRIMARY KEY,
            kind            TEXT NOT NULL,
            session_id      TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            payload         TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            status          TEXT NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 0,
            max_attempts    INTEGER NOT NULL,
            next_attempt_at TEXT,
            result          TEXT,
            error           TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_characters_user ON characters(user_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_status ON game_sessions(status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_join_code
            ON game_sessions(join_code) WHERE status != 'ended';
        CREATE INDEX IF NOT EXISTS idx_participants_session ON game_participants(session_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_refresh_tokens_hash ON refresh_tokens(token_hash);
        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_family ON refresh_tokens(token_id);
        CREATE INDEX IF NOT EXISTS idx_dice_rolls_session ON dice_rolls(session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_ai_jobs_due ON ai_jobs(status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_ai_jobs_idem ON ai_jobs(idempotency_key);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS ai_jobs;
        DROP TABLE IF EXISTS refresh_tokens;
        DROP TABLE IF EXISTS dice_rolls;
        DROP TABLE IF EXISTS game_participants;
        DROP TABLE IF EXISTS game_sessions;
        DROP TABLE IF EXISTS characters;
        DROP TABLE IF EXISTS users;
        "#,
    )?;
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> QueryContext {
        QueryContext::new("test")
    }

    #[tokio::test]
    async fn schema_initializes_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let tables: Vec<String> = db
            .query_all(
                &ctx(),
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                vec![],
                |row| row.get(0),
            )
            .await
            .unwrap();
        for expected in [
            "ai_jobs",
            "characters",
            "dice_rolls",
            "game_participants",
            "game_sessions",
            "refresh_tokens",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn execute_and_query_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            &ctx(),
            "INSERT INTO users (id, username, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
            vec![
                text("u1"),
                text("mira"),
                text("mira@example.com"),
                text("hash"),
                text("2026-01-01T00:00:00Z"),
            ],
        )
        .await
        .unwrap();

        let name: Option<String> = db
            .query_opt(
                &ctx(),
                "SELECT username FROM users WHERE id = ?",
                vec![text("u1")],
                |row| row.get(0),
            )
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("mira"));
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), StoreError> = db
            .with_tx(&ctx(), |tx| {
                tx.execute(
                    "INSERT INTO users (id, username, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
                    vec![
                        text("u1"),
                        text("mira"),
                        text("m@example.com"),
                        text("h"),
                        text("2026-01-01T00:00:00Z"),
                    ],
                )?;
                Err(StoreError::Conflict("forced".into()))
            })
            .await;
        assert!(result.is_err());

        let row: Option<String> = db
            .query_opt(&ctx(), "SELECT id FROM users WHERE id = ?", vec![text("u1")], |r| {
                r.get(0)
            })
            .await
            .unwrap();
        assert!(row.is_none(), "insert must have rolled back");
    }

    #[tokio::test]
    async fn elapsed_deadline_blocks_queries() {
        let db = Database::open_in_memory().unwrap();
        let expired = QueryContext::new("late").with_deadline_in(std::time::Duration::ZERO);
        let err = db
            .query_opt(&expired, "SELECT 1", vec![], |row| row.get::<_, i64>(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn join_code_unique_only_among_live_sessions() {
        let db = Database::open_in_memory().unwrap();
        let insert = "INSERT INTO game_sessions (id, name, director_id, status, max_participants, join_code, state, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";
        db.execute(
            &ctx(),
            insert,
            vec![
                text("s1"), text("one"), text("u1"), text("ended"),
                integer(4), text("ABCDEF"), text("{}"), text("2026-01-01T00:00:00Z"),
            ],
        )
        .await
        .unwrap();
        // Same code on a live session is fine (the old one ended).
        db.execute(
            &ctx(),
            insert,
            vec![
                text("s2"), text("two"), text("u1"), text("active"),
                integer(4), text("ABCDEF"), text("{}"), text("2026-01-02T00:00:00Z"),
            ],
        )
        .await
        .unwrap();
        // A second live session with the code violates the partial index.
        let err = db
            .execute(
                &ctx(),
                insert,
                vec![
                    text("s3"), text("three"), text("u1"), text("pending"),
                    integer(4), text("ABCDEF"), text("{}"), text("2026-01-03T00:00:00Z"),
                ],
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn probe_reports_healthy() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.probe().await);
        assert!(!db.health().is_degraded());
    }
}
