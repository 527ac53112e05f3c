// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{codes, FieldError, GameError};

/// The six ability scores. Design-bounded to [1, 30].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl AbilityScores {
    /// Standard modifier derivation: floor((score − 10) / 2).
    pub fn modifier(score: u8) -> i32 {
        (i32::from(score) - 10).div_euclid(2)
    }

    pub fn dex_modifier(&self) -> i32 {
        Self::modifier(self.dexterity)
    }

    fn check(&self) -> Vec<FieldError> {
        let mut bad = Vec::new();
        for (name, score) in [
            ("strength", self.strength),
            ("dexterity", self.dexterity),
            ("constitution", self.constitution),
            ("intelligence", self.intelligence),
            ("wisdom", self.wisdom),
            ("charisma", self.charisma),
        ] {
            if !(1..=30).contains(&score) {
                bad.push(FieldError::new(name, "must be between 1 and 30"));
            }
        }
        bad
    }
}

/// Per-level spell resources. Keys are spell levels 1–9.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSlots {
    pub max: std::collections::BTreeMap<u8, u8>,
    pub used: std::collections::BTreeMap<u8, u8>,
}

impl SpellSlots {
    pub fn available(&self, level: u8) -> u8 {
        let max = self.max.get(&level).copied().unwrap_or(0);
        let used = self.used.get(&level).copied().unwrap_or(0);
        max.saturating_sub(used)
    }
}

/// A player character. Owned by exactly one user; combats reference it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub race: String,
    pub class: String,
    pub level: u8,
    pub current_hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub abilities: AbilityScores,
    pub initiative_bonus: i32,
    pub speed: u32,
    pub proficiencies: Vec<String>,
    pub equipment: Vec<String>,
    pub spell_slots: SpellSlots,
    pub created_at: DateTime<Utc>,
}

impl Character {
    /// Validate the construction invariants. Called on create and update;
    /// mutators below preserve them afterwards.
    pub fn validate(&self) -> Result<(), GameError> {
        let mut fields = Vec::new();

        if self.name.trim().is_empty() {
            fields.push(FieldError::new("name", "must not be empty"));
        }
        if !(1..=20).contains(&self.level) {
            fields.push(FieldError::new("level", "must be between 1 and 20"));
        }
        if self.max_hp < 1 {
            fields.push(FieldError::new("maxHp", "must be at least 1"));
        }
        if self.current_hp < 0 || self.current_hp > self.max_hp {
            fields.push(FieldError::new("currentHp", "must be within [0, maxHp]"));
        }
        fields.extend(self.abilities.check());

        if fields.is_empty() {
            Ok(())
        } else {
            Err(GameError::validation_fields(
                codes::CHARACTER_INVALID,
                "invalid character",
                fields,
            ))
        }
    }

    /// Set current HP, clamped into [0, max].
    pub fn set_hp(&mut self, hp: i32) {
        self.current_hp = hp.clamp(0, self.max_hp);
    }

    /// Apply damage; HP never goes below zero. Returns the new value.
    pub fn take_damage(&mut self, amount: i32) -> i32 {
        self.set_hp(self.current_hp - amount.max(0));
        self.current_hp
    }

    /// Heal; HP never exceeds max. Returns the new value.
    pub fn heal(&mut self, amount: i32) -> i32 {
        self.set_hp(self.current_hp + amount.max(0));
        self.current_hp
    }

    pub fn is_conscious(&self) -> bool {
        self.current_hp > 0
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
