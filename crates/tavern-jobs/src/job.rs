// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tavern_model::GenerationRequest;
use uuid::Uuid;

use crate::backoff::Backoff;

/// Generation job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    NpcDialogue,
    LocationDescription,
    EncounterNarration,
    Culture,
    Faction,
    Settlement,
    CharacterBackstory,
    WorldEvent,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NpcDialogue => "npc_dialogue",
            Self::LocationDescription => "location_description",
            Self::EncounterNarration => "encounter_narration",
            Self::Culture => "culture",
            Self::Faction => "faction",
            Self::Settlement => "settlement",
            Self::CharacterBackstory => "character_backstory",
            Self::WorldEvent => "world_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "npc_dialogue" => Some(Self::NpcDialogue),
            "location_description" => Some(Self::LocationDescription),
            "encounter_narration" => Some(Self::EncounterNarration),
            "culture" => Some(Self::Culture),
            "faction" => Some(Self::Faction),
            "settlement" => Some(Self::Settlement),
            "character_backstory" => Some(Self::CharacterBackstory),
            "world_event" => Some(Self::WorldEvent),
            _ => None,
        }
    }

    /// Dispatch priority. Kinds a table is actively waiting on (dialogue in
    /// a running scene, encounter narration) preempt world-building that
    /// the director queued for later.
    pub fn priority(self) -> Priority {
        match self {
            Self::NpcDialogue | Self::EncounterNarration => Priority::Critical,
            Self::LocationDescription | Self::WorldEvent => Priority::Default,
            Self::Culture | Self::Faction | Self::Settlement | Self::CharacterBackstory => {
                Priority::Low
            }
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            Self::NpcDialogue => {
                "You voice non-player characters in a tabletop RPG. Reply with dialogue only, \
                 in character, no stage directions."
            }
            Self::EncounterNarration => {
                "You narrate combat encounters in a tabletop RPG. Two to four vivid sentences, \
                 second person, present tense."
            }
            Self::LocationDescription => {
                "You describe locations in a tabletop RPG world. Concrete sensory detail, \
                 one short paragraph."
            }
            Self::Culture | Self::Faction | Self::Settlement => {
                "You invent societies for a tabletop RPG world. Be specific and internally \
                 consistent; avoid cliches."
            }
            Self::CharacterBackstory => {
                "You write player-character backstories for a tabletop RPG. Grounded, \
                 personal, with one unresolved thread."
            }
            Self::WorldEvent => {
                "You generate world events for a tabletop RPG campaign. One event, its \
                 visible consequences, and a rumor about its cause."
            }
        }
    }

    /// Build the provider request for this kind from the submitted payload.
    ///
    /// `payload.prompt` is the director's free-text ask; `payload.context`
    /// (optional string array) supplies grounding facts.
    pub fn request(self, payload: &serde_json::Value) -> GenerationRequest {
        let prompt = payload
            .get("prompt")
            .and_then(|p| p.as_str())
            .unwrap_or("Continue the scene.")
            .to_string();
        let context = payload
            .get("context")
            .and_then(|c| c.as_array())
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        GenerationRequest::new(prompt)
            .with_system(self.system_prompt())
            .with_context(context)
    }
}

/// Strict dispatch priority: critical always preempts default, default
/// always preempts low, modulo jobs already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Default,
    Low,
}

/// The idempotency key: duplicate submits of the same (kind, session,
/// payload) within the configured window resolve to the existing job.
pub fn idempotency_key(kind: JobKind, session_id: Uuid, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub max_attempts: u32,
    /// Per-job provider deadline.
    pub job_deadline: Duration,
    /// Duplicate submits inside this window return the existing job.
    pub idempotency_window: Duration,
    pub backoff: Backoff,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            job_deadline: Duration::from_secs(60),
            idempotency_window: Duration::from_secs(60),
            backoff: Backoff::default(),
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            JobKind::NpcDialogue,
            JobKind::LocationDescription,
            JobKind::EncounterNarration,
            JobKind::Culture,
            JobKind::Faction,
            JobKind::Settlement,
            JobKind::CharacterBackstory,
            JobKind::WorldEvent,
        ] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("interpretive_dance"), None);
    }

    #[test]
    fn interactive_kinds_outrank_worldbuilding() {
        assert_eq!(JobKind::NpcDialogue.priority(), Priority::Critical);
        assert_eq!(JobKind::WorldEvent.priority(), Priority::Default);
        assert_eq!(JobKind::Culture.priority(), Priority::Low);
        assert!(Priority::Critical < Priority::Default);
        assert!(Priority::Default < Priority::Low);
    }

    #[test]
    fn request_uses_payload_prompt_and_context() {
        let payload = serde_json::json!({
            "prompt": "The innkeeper reacts to the stolen ledger.",
            "context": ["the ledger names the harbormaster", "the inn is crowded"],
        });
        let req = JobKind::NpcDialogue.request(&payload);
        assert_eq!(req.prompt, "The innkeeper reacts to the stolen ledger.");
        assert_eq!(req.context.len(), 2);
        assert!(req.system.unwrap().contains("dialogue"));
    }

    #[test]
    fn idempotency_key_depends_on_all_parts() {
        let session = Uuid::new_v4();
        let payload = serde_json::json!({"prompt": "x"});
        let base = idempotency_key(JobKind::Culture, session, &payload);
        assert_eq!(base, idempotency_key(JobKind::Culture, session, &payload));
        assert_ne!(base, idempotency_key(JobKind::Faction, session, &payload));
        assert_ne!(
            base,
            idempotency_key(JobKind::Culture, Uuid::new_v4(), &payload)
        );
        assert_ne!(
            base,
            idempotency_key(JobKind::Culture, session, &serde_json::json!({"prompt": "y"}))
        );
    }
}
