// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Turn-based combat engine.
//!
//! # State machine
//!
//! ```text
//!            start                    next-turn (no wrap)
//!   Setup ──────────► InRound ◄──────────────────────────┐
//!                        │  │                            │
//!                        │  └────────────────────────────┘
//!          wrap: turn    │
//!          index resets  ▼                 automatic (zero-duration)
//!                  BetweenRounds ──────────────────────► InRound
//!                        │
//!     end / side down    ▼
//!                      Ended
//! ```
//!
//! `BetweenRounds` is traversed atomically inside [`Combat::next_turn`]:
//! the round increments, boundary effects expire, durations tick, and the
//! engine lands back in `InRound` before the call returns. Callers observe
//! the traversal through [`TurnAdvance::wrapped`].
//!
//! The engine is pure: authorization and persistence live in the service
//! layer, and every die it needs (initiative, concentration checks) comes
//! from the [`Roller`] passed in, so outcomes are reproducible from the
//! roll seed.

mod combatant;
mod conditions;
mod damage;

pub use combatant::{ActionEconomy, Combatant, CombatantKind};
pub use conditions::{ActiveCondition, Condition};
pub use damage::{mitigate, DamageResponse, DamageType, Defenses};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dice::Roller;
use crate::error::{codes, GameError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatPhase {
    Setup,
    InRound,
    BetweenRounds,
    Ended,
}

/// A tracked effect (spell, aura, hazard). Effects referenced by a
/// combatant's concentration link are dropped when the link breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub id: Uuid,
    pub name: String,
    pub source: Uuid,
    /// Cleared at the next round boundary regardless of duration.
    pub expires_on_round_boundary: bool,
    /// `None` lasts until removed.
    pub remaining_rounds: Option<u32>,
}

/// What changed when a turn advanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAdvance {
    pub round: u32,
    pub current_turn: usize,
    pub actor: Uuid,
    /// Whether the order wrapped (a new round began).
    pub wrapped: bool,
    pub expired_effects: Vec<Uuid>,
    pub expired_conditions: Vec<(Uuid, Condition)>,
}

/// Outcome of a concentration check forced by damage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationOutcome {
    pub dc: i32,
    pub roll: i64,
    pub held: bool,
    /// The effect dropped on failure.
    pub dropped_effect: Option<Uuid>,
}

/// Outcome of a damage application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageReport {
    pub target: Uuid,
    pub raw: i32,
    pub taken: i32,
    pub response: DamageResponse,
    pub hp: i32,
    pub fell_unconscious: bool,
    pub concentration: Option<ConcentrationOutcome>,
    /// Set when the damage left a whole side down and ended the combat.
    pub combat_ended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combat {
    pub id: Uuid,
    pub session_id: Uuid,
    pub phase: CombatPhase,
    /// Monotonically non-decreasing; starts at 1 when combat begins.
    pub round: u32,
    /// Index into `order`; always < `order.len()` while in a round.
    pub current_turn: usize,
    /// Turn order by combatant id — each id exactly once.
    pub order: Vec<Uuid>,
    combatants: BTreeMap<Uuid, Combatant>,
    effects: BTreeMap<Uuid, ActiveEffect>,
    /// Insertion order, the final initiative tie-break.
    arrival: Vec<Uuid>,
}

impl Combat {
    pub fn new(session_id: Uuid, combatants: Vec<Combatant>) -> Result<Self, GameError> {
        if combatants.is_empty() {
            return Err(GameError::validation(
                codes::COMBAT_EMPTY,
                "combat requires at least one combatant",
            ));
        }
        let arrival: Vec<Uuid> = combatants.iter().map(|c| c.id).collect();
        let mut by_id = BTreeMap::new();
        for c in combatants {
            if by_id.insert(c.id, c).is_some() {
                return Err(GameError::conflict(
                    codes::COMBATANT_NOT_FOUND,
                    "duplicate combatant id",
                ));
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            session_id,
            phase: CombatPhase::Setup,
            round: 0,
            current_turn: 0,
            order: Vec::new(),
            combatants: by_id,
            effects: BTreeMap::new(),
            arrival,
        })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, CombatPhase::InRound | CombatPhase::BetweenRounds)
    }

    pub fn combatant(&self, id: Uuid) -> Result<&Combatant, GameError> {
        self.combatants
            .get(&id)
            .ok_or_else(|| GameError::not_found(codes::COMBATANT_NOT_FOUND, "combatant"))
    }

    fn combatant_mut(&mut self, id: Uuid) -> Result<&mut Combatant, GameError> {
        self.combatants
            .get_mut(&id)
            .ok_or_else(|| GameError::not_found(codes::COMBATANT_NOT_FOUND, "combatant"))
    }

    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants.values()
    }

    pub fn effect(&self, id: Uuid) -> Option<&ActiveEffect> {
        self.effects.get(&id)
    }

    /// The combatant whose turn it is, while a round is running.
    pub fn current_actor(&self) -> Option<&Combatant> {
        if self.phase != CombatPhase::InRound {
            return None;
        }
        self.order
            .get(self.current_turn)
            .and_then(|id| self.combatants.get(id))
    }

    // ── start ─────────────────────────────────────────────────────────────────

    /// Roll initiative for every combatant without one and lock the turn
    /// order. Ordering: initiative descending, then Dexterity descending,
    /// then players before NPCs, then arrival order (the sort is stable).
    pub fn start(&mut self, roller: &mut Roller) -> Result<&[Uuid], GameError> {
        if self.phase != CombatPhase::Setup {
            return Err(GameError::conflict(
                codes::COMBAT_ALREADY_ACTIVE,
                "combat already started",
            ));
        }

        for id in &self.arrival {
            let c = self.combatants.get_mut(id).expect("arrival ids are valid");
            if c.initiative.is_none() {
                let roll = roller.roll_die(20);
                c.initiative = Some(roll as i32 + c.initiative_bonus);
            }
        }

        let mut order = self.arrival.clone();
        let combatants = &self.combatants;
        order.sort_by(|a, b| {
            let ca = &combatants[a];
            let cb = &combatants[b];
            cb.initiative
                .cmp(&ca.initiative)
                .then(cb.dexterity.cmp(&ca.dexterity))
                .then(cb.is_player().cmp(&ca.is_player()))
        });

        self.order = order;
        self.round = 1;
        self.current_turn = 0;
        self.phase = CombatPhase::InRound;
        if let Some(first) = self.order.first().copied() {
            self.combatants
                .get_mut(&first)
                .expect("order ids are valid")
                .begin_turn();
        }
        Ok(&self.order)
    }

    // ── next-turn ─────────────────────────────────────────────────────────────

    pub fn next_turn(&mut self) -> Result<TurnAdvance, GameError> {
        if self.phase != CombatPhase::InRound {
            return Err(GameError::conflict(
                codes::COMBAT_NOT_ACTIVE,
                "combat is not in a round",
            ));
        }

        let mut expired_effects = Vec::new();
        let mut expired_conditions = Vec::new();
        let wrapped = self.current_turn + 1 >= self.order.len();

        if wrapped {
            self.phase = CombatPhase::BetweenRounds;
            self.round += 1;
            self.current_turn = 0;
            self.tick_round_boundary(&mut expired_effects, &mut expired_conditions);
            self.phase = CombatPhase::InRound;
        } else {
            self.current_turn += 1;
        }

        let actor = self.order[self.current_turn];
        self.combatants
            .get_mut(&actor)
            .expect("order ids are valid")
            .begin_turn();

        Ok(TurnAdvance {
            round: self.round,
            current_turn: self.current_turn,
            actor,
            wrapped,
            expired_effects,
            expired_conditions,
        })
    }

    fn tick_round_boundary(
        &mut self,
        expired_effects: &mut Vec<Uuid>,
        expired_conditions: &mut Vec<(Uuid, Condition)>,
    ) {
        // Effects first: boundary-scoped ones go unconditionally, the rest
        // tick their duration.
        let mut gone = Vec::new();
        for (id, effect) in &mut self.effects {
            if effect.expires_on_round_boundary {
                gone.push(*id);
                continue;
            }
            if let Some(n) = &mut effect.remaining_rounds {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    gone.push(*id);
                }
            }
        }
        for id in gone {
            self.effects.remove(&id);
            expired_effects.push(id);
            // Anyone concentrating on an expired effect stops.
            for c in self.combatants.values_mut() {
                if c.concentration == Some(id) {
                    c.concentration = None;
                }
            }
        }

        for c in self.combatants.values_mut() {
            let mut done = Vec::new();
            for (cond, active) in &mut c.conditions {
                if active.tick() {
                    done.push(*cond);
                }
            }
            for cond in done {
                c.conditions.remove(&cond);
                expired_conditions.push((c.id, cond));
            }
        }
    }

    // ── damage ────────────────────────────────────────────────────────────────

    /// Apply damage to a combatant, running the defense algebra, the
    /// unconsciousness check and any forced concentration check (the check
    /// die comes from `roller`).
    pub fn deal_damage(
        &mut self,
        target_id: Uuid,
        amount: i32,
        dtype: DamageType,
        roller: &mut Roller,
    ) -> Result<DamageReport, GameError> {
        if !self.is_active() {
            return Err(GameError::conflict(
                codes::COMBAT_NOT_ACTIVE,
                "combat is not active",
            ));
        }

        // Read phase: compute everything before mutating, so a not-found
        // target leaves the combat untouched.
        let target = self.combatant(target_id)?;
        let (taken, response) = mitigate(amount, dtype, &target.defenses);
        let new_hp = (target.hp - taken).max(0);
        let fell_unconscious = new_hp == 0 && target.hp > 0;
        let needs_check = taken > 0 && target.concentration.is_some();

        let concentration = if needs_check {
            let dc = 10.max(taken / 2);
            let roll = roller.roll_die(20);
            let held = roll >= i64::from(dc);
            Some((dc, roll, held))
        } else {
            None
        };

        let target = self.combatant_mut(target_id)?;
        target.set_hp(new_hp);
        if fell_unconscious {
            apply_one(target, Condition::Unconscious, None, None);
        }

        let concentration = match concentration {
            Some((dc, roll, held)) => {
                let dropped = if !held || fell_unconscious {
                    self.break_concentration(target_id)
                } else {
                    None
                };
                Some(ConcentrationOutcome {
                    dc,
                    roll,
                    held: held && !fell_unconscious,
                    dropped_effect: dropped,
                })
            }
            // Falling unconscious always breaks concentration, even when
            // the damage was fully absorbed before a check was warranted.
            None => {
                if fell_unconscious {
                    self.break_concentration(target_id);
                }
                None
            }
        };

        let combat_ended = if !self.side_conscious(true) || !self.side_conscious(false) {
            self.phase = CombatPhase::Ended;
            true
        } else {
            false
        };

        Ok(DamageReport {
            target: target_id,
            raw: amount.max(0),
            taken,
            response,
            hp: new_hp,
            fell_unconscious,
            concentration,
            combat_ended,
        })
    }

    fn side_conscious(&self, players: bool) -> bool {
        self.combatants
            .values()
            .filter(|c| c.is_player() == players)
            .any(|c| c.is_conscious())
            // A side that was never present cannot be "down".
            || !self.combatants.values().any(|c| c.is_player() == players)
    }

    // ── conditions ────────────────────────────────────────────────────────────

    /// Apply a condition. Duplicates coalesce (longest duration wins) and
    /// implied conditions (stunned/paralyzed → incapacitated) ride along
    /// with the same duration. Returns every condition actually touched.
    pub fn apply_condition(
        &mut self,
        target_id: Uuid,
        condition: Condition,
        source: Option<Uuid>,
        duration_rounds: Option<u32>,
    ) -> Result<Vec<Condition>, GameError> {
        let target = self.combatant_mut(target_id)?;
        let mut touched = vec![condition];
        apply_one(target, condition, source, duration_rounds);
        for &implied in condition.implies() {
            apply_one(target, implied, source, duration_rounds);
            touched.push(implied);
        }
        Ok(touched)
    }

    pub fn remove_condition(
        &mut self,
        target_id: Uuid,
        condition: Condition,
    ) -> Result<bool, GameError> {
        let target = self.combatant_mut(target_id)?;
        Ok(target.conditions.remove(&condition).is_some())
    }

    // ── concentration ─────────────────────────────────────────────────────────

    /// Register an effect and bind the caster's concentration to it.
    /// Starting a new concentration drops the previous one.
    pub fn set_concentration(
        &mut self,
        caster_id: Uuid,
        effect: ActiveEffect,
    ) -> Result<Option<Uuid>, GameError> {
        // Validate the caster before touching the effect table.
        self.combatant(caster_id)?;
        let previous = self.break_concentration(caster_id);
        let effect_id = effect.id;
        self.effects.insert(effect_id, effect);
        self.combatant_mut(caster_id)?.concentration = Some(effect_id);
        Ok(previous)
    }

    /// Drop a combatant's concentrated effect, if any. Returns its id.
    pub fn end_concentration(&mut self, caster_id: Uuid) -> Result<Option<Uuid>, GameError> {
        self.combatant(caster_id)?;
        Ok(self.break_concentration(caster_id))
    }

    fn break_concentration(&mut self, caster_id: Uuid) -> Option<Uuid> {
        let effect_id = self
            .combatants
            .get_mut(&caster_id)
            .and_then(|c| c.concentration.take())?;
        self.effects.remove(&effect_id);
        Some(effect_id)
    }

    // ── end ───────────────────────────────────────────────────────────────────

    pub fn end(&mut self) -> Result<(), GameError> {
        if self.phase == CombatPhase::Ended {
            return Err(GameError::conflict(
                codes::COMBAT_NOT_ACTIVE,
                "combat already ended",
            ));
        }
        self.phase = CombatPhase::Ended;
        Ok(())
    }
}

fn apply_one(
    target: &mut Combatant,
    condition: Condition,
    source: Option<Uuid>,
    duration_rounds: Option<u32>,
) {
    let incoming = ActiveCondition {
        condition,
        source,
        remaining_rounds: duration_rounds,
    };
    target
        .conditions
        .entry(condition)
        .and_modify(|existing| existing.coalesce(&incoming))
        .or_insert(incoming);
}

// ── Unit tests ────────────────────────────────────────────────────────────────
