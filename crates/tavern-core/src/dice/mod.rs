// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dice notation and rolling.
//!
//! The roller draws faces from an explicit source, so the same code path
//! serves three purposes: live rolls (RNG-backed source), audit replay
//! (recorded faces as the source) and tests (scripted faces). A roll is
//! reconstructable from its notation plus the recorded face sequence.

mod notation;
mod roller;

pub use notation::{Advantage, DiceModifier, Notation, Term, TermKind};
pub use roller::{replay, RollOutcome, Roller};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted dice roll.
///
/// `results` holds every face drawn, in draw order, **before** any
/// keep/reroll/explode collapse. `modifier` is the flat part (notation
/// constants plus the caller-supplied bonus). For plain notations
/// `total = Σresults + modifier`; keep/reroll variants collapse first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceRoll {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub user_id: Uuid,
    pub character_id: Option<Uuid>,
    pub notation: String,
    pub results: Vec<i64>,
    pub modifier: i64,
    pub total: i64,
    pub purpose: String,
    /// PRNG seed used for this roll; with `notation` it reprints the roll.
    pub seed: u64,
    /// Set when persistence failed; unlogged rolls are never broadcast.
    #[serde(default)]
    pub unlogged: bool,
    pub rolled_at: DateTime<Utc>,
}
