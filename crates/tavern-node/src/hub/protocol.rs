// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol between clients and the session hub.
//!
//! JSON over WebSocket (text frames). Every server frame is an
//! [`Envelope`] `{type, seq?, sessionId?, correlationId, payload}`;
//! broadcast events carry the per-session sequence number, control frames
//! (`auth-required`, `session-snapshot`, `error`) do not.
//!
//! # Typical session flow
//!
//! ```text
//! Client                               Hub
//!    │◄─ auth-required ─────────────────│   (first frame after upgrade)
//!    │── auth {token, session_id} ─────►│   token in-band, never in the URL
//!    │◄─ session-snapshot {seq, ...} ───│
//!    │◄─ participant-joined (seq n) ────│   broadcast to everyone
//!    │── chat {text} ──────────────────►│
//!    │◄─ chat (seq n+1) ────────────────│
//!    │── roll-dice {notation} ─────────►│
//!    │◄─ dice-roll (seq n+2) ───────────│
//!    │       ...disconnect...           │
//!    │── auth + resume {last_seq} ─────►│
//!    │◄─ replayed events, or ───────────│
//!    │◄─ error {snapshot-required} ─────│
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tavern_core::{Combatant, DamageType, GameEvent, GameSession, Participant};
use uuid::Uuid;

// ── Server → client ───────────────────────────────────────────────────────────

/// The server frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub correlation_id: String,
    pub payload: Value,
}

impl Envelope {
    /// Wrap a broadcast event: the event's tag becomes the envelope type,
    /// its fields the payload.
    pub fn event(
        session_id: Uuid,
        seq: u64,
        correlation_id: impl Into<String>,
        event: &GameEvent,
    ) -> Self {
        let mut payload = serde_json::to_value(event).expect("events serialize");
        let kind = event.kind().to_string();
        if let Some(map) = payload.as_object_mut() {
            map.remove("type");
        }
        Self {
            kind,
            seq: Some(seq),
            session_id: Some(session_id),
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    /// A control frame (no sequence number).
    pub fn control(kind: &str, correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            seq: None,
            session_id: None,
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    pub fn error(correlation_id: impl Into<String>, code: &str, message: &str) -> Self {
        Self::control(
            "error",
            correlation_id,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}

/// Public session state sent on attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: GameSession,
    pub participants: Vec<Participant>,
    pub combat: Option<CombatView>,
    /// Sequence number of the last event broadcast before this snapshot;
    /// subsequent events continue from here.
    pub seq: u64,
}

/// Combat as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatView {
    pub combat_id: Uuid,
    pub round: u32,
    pub current_turn: usize,
    pub order: Vec<Uuid>,
    pub combatants: Vec<Combatant>,
}

// ── Client → server ───────────────────────────────────────────────────────────

/// Messages a client may send on the duplex stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// First message after `auth-required`. The token is the same bearer
    /// access token used on the REST surface.
    Auth {
        token: String,
        session_id: Uuid,
        /// Resume point: last sequence number seen on a previous
        /// connection. Absent on a fresh connect.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seq: Option<u64>,
    },
    Chat {
        text: String,
    },
    RollDice {
        notation: String,
        #[serde(default)]
        purpose: Option<String>,
        #[serde(default)]
        character_id: Option<Uuid>,
    },
    CombatAction {
        #[serde(flatten)]
        action: CombatAction,
    },
    Resume {
        last_seq: u64,
    },
}

/// Combat commands, dispatched into the session's serialized command
/// stream. Authorization: directors may do everything; participants may
/// act for characters they own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum CombatAction {
    Start {
        /// Characters entering combat, by id.
        character_ids: Vec<Uuid>,
        #[serde(default)]
        npcs: Vec<NpcSpec>,
    },
    NextTurn,
    DealDamage {
        target_id: Uuid,
        amount: i32,
        damage_type: DamageType,
    },
    ApplyCondition {
        target_id: Uuid,
        condition: tavern_core::Condition,
        #[serde(default)]
        source_id: Option<Uuid>,
        #[serde(default)]
        duration_rounds: Option<u32>,
    },
    RemoveCondition {
        target_id: Uuid,
        condition: tavern_core::Condition,
    },
    SetConcentration {
        caster_id: Uuid,
        effect_name: String,
        #[serde(default)]
        duration_rounds: Option<u32>,
    },
    EndConcentration {
        caster_id: Uuid,
    },
    End,
}

/// Director-authored NPC entering combat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcSpec {
    pub name: String,
    pub hp: i32,
    pub armor_class: i32,
    pub dexterity: u8,
}

/// Close reasons for the duplex stream.
pub mod close {
    pub const AUTH_FAILED: &str = "auth-failed";
    pub const SLOW_CONSUMER: &str = "slow-consumer";
    pub const KICKED: &str = "kicked";
    pub const SESSION_ENDED: &str = "session-ended";
    pub const IDLE: &str = "idle-timeout";
}

// ── Unit tests ────────────────────────────────────────────────────────────────
