// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Repositories.
//!
//! One repository per aggregate, every query authored with `?`
//! placeholders and executed through [`crate::Database`]. Repositories
//! return [`StoreError`]; services translate into the API taxonomy.

mod ai_jobs;
mod characters;
mod dice_rolls;
mod refresh_tokens;
mod sessions;
mod users;

pub use ai_jobs::{AiJobRecord, AiJobRepo, JobStatus};
pub use characters::CharacterRepo;
pub use dice_rolls::DiceRollRepo;
pub use refresh_tokens::{RefreshTokenRecord, RefreshTokenRepo, RotationOutcome};
pub use sessions::SessionRepo;
pub use users::{User, UserRepo};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

// ── Row mapping helpers ───────────────────────────────────────────────────────
//
// TEXT columns hold uuids, RFC 3339 timestamps and JSON blobs; these
// converters surface malformed stored values as conversion failures with
// the column index intact.

pub(crate) fn get_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn get_opt_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn get_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn get_opt_time(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("domain types serialize")
}

pub(crate) fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}
