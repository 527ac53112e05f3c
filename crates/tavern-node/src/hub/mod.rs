// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod protocol;
mod service;

pub use protocol::{
    ClientMessage, CombatAction, CombatView, Envelope, NpcSpec, SessionSnapshot,
};
pub use service::{HubHandle, Registered, SessionHub};
