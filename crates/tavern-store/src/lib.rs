// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Repository coordination layer.
//!
//! Repositories author every query with positional `?` placeholders; the
//! [`rebind`] module translates them to the active dialect at execution
//! time, so no dialect-specific placeholder ever appears in a call site.
//! Execution goes through [`Database`] with a [`QueryContext`] carrying the
//! correlation id, user id and deadline — the query log records the
//! correlation id, the post-rebind SQL, the argument arity (never values)
//! and the elapsed time.
//!
//! Reads may be memoized in the process-local [`ResponseCache`]; writes
//! invalidate their dependent method sets. Concurrent identical reads
//! collapse into a single underlying query.

pub mod cache;
pub mod context;
pub mod db;
pub mod error;
pub mod page;
pub mod pool;
pub mod rebind;
pub mod repos;

pub use cache::ResponseCache;
pub use context::QueryContext;
pub use db::Database;
pub use error::StoreError;
pub use page::{Cursor, PageRequest, PageResult};
pub use pool::{PoolHealth, PoolSettings};
pub use rebind::{rebind, Dialect};
pub use repos::{
    AiJobRecord, AiJobRepo, CharacterRepo, DiceRollRepo, JobStatus, RefreshTokenRecord,
    RefreshTokenRepo, RotationOutcome, SessionRepo, User, UserRepo,
};
