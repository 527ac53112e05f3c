// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::combat::{Combat, DamageReport, TurnAdvance};
use crate::dice::DiceRoll;

/// Events broadcast to a session's participants.
///
/// This is the payload vocabulary; the hub wraps each event in the wire
/// envelope (sequence number, session id, correlation id) before it leaves
/// the process. Tags are kebab-case on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GameEvent {
    Chat {
        user_id: Uuid,
        character_name: Option<String>,
        text: String,
    },
    DiceRoll {
        roll: DiceRoll,
    },
    CombatStarted {
        combat: Box<Combat>,
    },
    CombatUpdated {
        combat_id: Uuid,
        turn: Option<TurnAdvance>,
        damage: Option<DamageReport>,
    },
    CombatEnded {
        combat_id: Uuid,
    },
    ParticipantJoined {
        user_id: Uuid,
        username: String,
    },
    ParticipantLeft {
        user_id: Uuid,
        username: String,
    },
    AiArtifact {
        job_id: Uuid,
        kind: String,
        content: String,
    },
    WorldEvent {
        title: String,
        description: String,
    },
    SessionPaused,
    SessionResumed,
    SessionEnded,
}

impl GameEvent {
    /// Wire tag for logging and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::DiceRoll { .. } => "dice-roll",
            Self::CombatStarted { .. } => "combat-started",
            Self::CombatUpdated { .. } => "combat-updated",
            Self::CombatEnded { .. } => "combat-ended",
            Self::ParticipantJoined { .. } => "participant-joined",
            Self::ParticipantLeft { .. } => "participant-left",
            Self::AiArtifact { .. } => "ai-artifact",
            Self::WorldEvent { .. } => "world-event",
            Self::SessionPaused => "session-paused",
            Self::SessionResumed => "session-resumed",
            Self::SessionEnded => "session-ended",
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_kebab_case_on_the_wire() {
        let ev = GameEvent::ParticipantJoined {
            user_id: Uuid::new_v4(),
            username: "mira".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "participant-joined");
        assert_eq!(ev.kind(), "participant-joined");
    }

    #[test]
    fn ai_artifact_round_trips() {
        let ev = GameEvent::AiArtifact {
            job_id: Uuid::new_v4(),
            kind: "npc_dialogue".into(),
            content: "\"Keep your blade sheathed in my tavern.\"".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "ai-artifact");
    }
}
