// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Domain model and rules engines for the tavern game server.
//!
//! Everything in this crate is pure: no I/O, no clocks other than values
//! passed in, no global state. Randomness enters through explicit face
//! sources so every outcome is reconstructable (see [`dice`]). Entities
//! reference each other by id only; resolution happens in the repository
//! layer.

pub mod character;
pub mod combat;
pub mod dice;
pub mod error;
pub mod events;
pub mod session;

pub use character::{AbilityScores, Character, SpellSlots};
pub use combat::{Combat, CombatPhase, Combatant, CombatantKind, Condition, DamageType};
pub use error::{ErrorKind, FieldError, GameError};
pub use events::GameEvent;
pub use session::{GameSession, JoinCode, Participant, SessionStatus, StateBag};
