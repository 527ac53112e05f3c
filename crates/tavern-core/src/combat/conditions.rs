// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed condition vocabulary. Anything outside this set is a
/// validation error at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
}

impl Condition {
    /// Conditions implicitly applied alongside this one.
    pub fn implies(self) -> &'static [Condition] {
        match self {
            Condition::Stunned | Condition::Paralyzed => &[Condition::Incapacitated],
            _ => &[],
        }
    }
}

/// A condition applied to a combatant, with its source and remaining
/// duration. `remaining_rounds = None` means until removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub condition: Condition,
    pub source: Option<Uuid>,
    pub remaining_rounds: Option<u32>,
}

impl ActiveCondition {
    /// Coalesce a duplicate application: the longer duration wins, where
    /// indefinite outlasts any finite count.
    pub fn coalesce(&mut self, other: &ActiveCondition) {
        self.remaining_rounds = match (self.remaining_rounds, other.remaining_rounds) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(a.max(b)),
        };
        if self.source.is_none() {
            self.source = other.source;
        }
    }

    /// Tick one round; returns `true` when the condition expired.
    pub fn tick(&mut self) -> bool {
        match &mut self.remaining_rounds {
            Some(0) | None => false,
            Some(n) => {
                *n -= 1;
                *n == 0
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
