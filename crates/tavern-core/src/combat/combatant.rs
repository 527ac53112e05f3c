// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::{AbilityScores, Character};

use super::conditions::{ActiveCondition, Condition};
use super::damage::Defenses;

/// Player combatants are bound to a character (by id — the character itself
/// lives behind the repository); NPCs are free-standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CombatantKind {
    Player { character_id: Uuid },
    Npc,
}

/// The per-turn action budget. Reset when the combatant's turn begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEconomy {
    pub action_used: bool,
    pub bonus_action_used: bool,
    pub reaction_used: bool,
    pub movement_remaining: u32,
}

impl ActionEconomy {
    pub fn fresh(speed: u32) -> Self {
        Self {
            action_used: false,
            bonus_action_used: false,
            reaction_used: false,
            movement_remaining: speed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub id: Uuid,
    pub name: String,
    pub kind: CombatantKind,
    /// Assigned when combat starts; `None` during setup.
    pub initiative: Option<i32>,
    pub dexterity: u8,
    pub initiative_bonus: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub speed: u32,
    pub conditions: BTreeMap<Condition, ActiveCondition>,
    /// Effect this combatant concentrates on, if any.
    pub concentration: Option<Uuid>,
    pub economy: ActionEconomy,
    pub defenses: Defenses,
}

impl Combatant {
    /// Build a player combatant from their character sheet.
    pub fn player(character: &Character) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: character.name.clone(),
            kind: CombatantKind::Player {
                character_id: character.id,
            },
            initiative: None,
            dexterity: character.abilities.dexterity,
            initiative_bonus: character.initiative_bonus,
            hp: character.current_hp,
            max_hp: character.max_hp,
            armor_class: character.armor_class,
            speed: character.speed,
            conditions: BTreeMap::new(),
            concentration: None,
            economy: ActionEconomy::fresh(character.speed),
            defenses: Defenses::default(),
        }
    }

    pub fn npc(name: impl Into<String>, hp: i32, armor_class: i32, dexterity: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: CombatantKind::Npc,
            initiative: None,
            dexterity,
            initiative_bonus: AbilityScores::modifier(dexterity),
            hp,
            max_hp: hp,
            armor_class,
            speed: 30,
            conditions: BTreeMap::new(),
            concentration: None,
            economy: ActionEconomy::fresh(30),
            defenses: Defenses::default(),
        }
    }

    pub fn with_defenses(mut self, defenses: Defenses) -> Self {
        self.defenses = defenses;
        self
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, CombatantKind::Player { .. })
    }

    pub fn character_id(&self) -> Option<Uuid> {
        match self.kind {
            CombatantKind::Player { character_id } => Some(character_id),
            CombatantKind::Npc => None,
        }
    }

    pub fn is_conscious(&self) -> bool {
        self.hp > 0 && !self.conditions.contains_key(&Condition::Unconscious)
    }

    /// HP mutation, clamped into [0, max]. Returns the new value.
    pub fn set_hp(&mut self, hp: i32) -> i32 {
        self.hp = hp.clamp(0, self.max_hp);
        self.hp
    }

    pub fn begin_turn(&mut self) {
        self.economy = ActionEconomy::fresh(self.speed);
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::character::SpellSlots;

    use super::*;

    fn rogue() -> Character {
        Character {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Vex".into(),
            race: "half-elf".into(),
            class: "rogue".into(),
            level: 3,
            current_hp: 21,
            max_hp: 24,
            armor_class: 15,
            abilities: AbilityScores {
                dexterity: 18,
                ..AbilityScores::default()
            },
            initiative_bonus: 2,
            speed: 35,
            proficiencies: vec![],
            equipment: vec![],
            spell_slots: SpellSlots::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn player_combatant_mirrors_character_sheet() {
        let c = rogue();
        let cb = Combatant::player(&c);
        assert_eq!(cb.character_id(), Some(c.id));
        assert_eq!(cb.hp, 21);
        assert_eq!(cb.max_hp, 24);
        assert_eq!(cb.dexterity, 18);
        assert_eq!(cb.initiative_bonus, 2);
        assert_eq!(cb.speed, 35);
        assert!(cb.is_player());
        assert!(cb.initiative.is_none());
    }

    #[test]
    fn npc_derives_initiative_bonus_from_dex() {
        let cb = Combatant::npc("goblin", 7, 15, 14);
        assert_eq!(cb.initiative_bonus, 2);
        assert!(!cb.is_player());
        assert_eq!(cb.character_id(), None);
    }

    #[test]
    fn hp_clamps_both_ends() {
        let mut cb = Combatant::npc("ogre", 59, 11, 8);
        assert_eq!(cb.set_hp(-10), 0);
        assert_eq!(cb.set_hp(1000), 59);
    }

    #[test]
    fn begin_turn_resets_economy() {
        let mut cb = Combatant::npc("bandit", 11, 12, 12);
        cb.economy.action_used = true;
        cb.economy.bonus_action_used = true;
        cb.economy.movement_remaining = 0;
        cb.begin_turn();
        assert!(!cb.economy.action_used);
        assert!(!cb.economy.bonus_action_used);
        assert_eq!(cb.economy.movement_remaining, 30);
    }

    #[test]
    fn unconscious_condition_makes_combatant_not_conscious() {
        let mut cb = Combatant::npc("cultist", 9, 12, 10);
        assert!(cb.is_conscious());
        cb.conditions.insert(
            Condition::Unconscious,
            ActiveCondition {
                condition: Condition::Unconscious,
                source: None,
                remaining_rounds: None,
            },
        );
        assert!(!cb.is_conscious());
    }
}
