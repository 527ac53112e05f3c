// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Domain services: the layer between handlers and repositories.
//!
//! Services validate, authorize, commit through repositories and publish
//! the resulting event to the hub. Combat commands are not here — they run
//! inside the hub actor, which is the per-session serialization domain.

pub mod dice;
pub mod sessions;

pub use dice::{DiceService, RollParams};
pub use sessions::{SessionRef, SessionService};
