// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{codes, GameError};

/// Lifecycle state of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but nothing broadcast yet.
    Pending,
    /// At least one event has been broadcast.
    Active,
    /// Paused by the director; mutations rejected, reads allowed.
    Paused,
    /// Terminal. Ended sessions are immutable.
    Ended,
}

/// Six-character join code, unique among non-ended sessions.
///
/// The alphabet omits `0/O` and `1/I` so a code read out loud at the table
/// survives transcription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LEN: usize = 6;

impl JoinCode {
    pub fn generate(rng: &mut impl Rng) -> Self {
        let code: String = (0..JOIN_CODE_LEN)
            .map(|_| {
                let i = rng.gen_range(0..JOIN_CODE_ALPHABET.len());
                JOIN_CODE_ALPHABET[i] as char
            })
            .collect();
        JoinCode(code)
    }

    pub fn parse(s: &str) -> Result<Self, GameError> {
        let up = s.trim().to_ascii_uppercase();
        if up.len() != JOIN_CODE_LEN || !up.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)) {
            return Err(GameError::validation(
                codes::BAD_REQUEST,
                "malformed join code",
            ));
        }
        Ok(JoinCode(up))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Versioned session state bag.
///
/// The tag is the schema version; deserializing an unknown version fails,
/// which is exactly the contract — unknown variants are rejected, not
/// silently coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum StateBag {
    #[serde(rename = "1")]
    V1 {
        /// Scene description currently shown to players.
        #[serde(default)]
        scene: Option<String>,
        /// Director-maintained world notes, newest last.
        #[serde(default)]
        notes: Vec<String>,
        /// Id of the active combat, if one is running.
        #[serde(default)]
        active_combat: Option<Uuid>,
    },
}

impl Default for StateBag {
    fn default() -> Self {
        StateBag::V1 {
            scene: None,
            notes: Vec::new(),
            active_combat: None,
        }
    }
}

impl StateBag {
    /// Parse from raw JSON, rejecting unknown versions with a typed error.
    pub fn from_json(value: serde_json::Value) -> Result<Self, GameError> {
        serde_json::from_value(value).map_err(|e| {
            GameError::validation(
                codes::STATE_BAG_UNKNOWN_VERSION,
                format!("unrecognized state bag: {e}"),
            )
        })
    }
}

/// Membership row: one per (session, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub character_id: Option<Uuid>,
    pub online: bool,
    pub joined_at: DateTime<Utc>,
}

/// A game session. The director owns it; participants join by code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub id: Uuid,
    pub name: String,
    pub director_id: Uuid,
    pub status: SessionStatus,
    pub max_participants: u32,
    pub join_code: JoinCode,
    pub state: StateBag,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    pub fn new(
        name: impl Into<String>,
        director_id: Uuid,
        max_participants: u32,
        rng: &mut impl Rng,
    ) -> Result<Self, GameError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(GameError::validation(
                codes::BAD_REQUEST,
                "session name must not be empty",
            ));
        }
        if max_participants < 1 {
            return Err(GameError::validation(
                codes::SESSION_CAPACITY_EXCEEDED,
                "maxParticipants must be at least 1",
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            director_id,
            status: SessionStatus::Pending,
            max_participants,
            join_code: JoinCode::generate(rng),
            state: StateBag::default(),
            created_at: Utc::now(),
            ended_at: None,
        })
    }

    pub fn is_director(&self, user_id: Uuid) -> bool {
        self.director_id == user_id
    }

    /// Whether a new participant may be admitted given the current count.
    ///
    /// The director does not count against capacity; they own the session
    /// rather than occupy a seat.
    pub fn check_capacity(&self, current_participants: u32) -> Result<(), GameError> {
        if self.status == SessionStatus::Ended {
            return Err(GameError::not_found(codes::SESSION_NOT_FOUND, "session"));
        }
        if current_participants >= self.max_participants {
            return Err(GameError::conflict(
                codes::SESSION_CAPACITY_EXCEEDED,
                "session is full",
            ));
        }
        Ok(())
    }

    /// First broadcast flips a pending session active.
    pub fn mark_active(&mut self) {
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Active;
        }
    }

    pub fn pause(&mut self) -> Result<(), GameError> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Paused;
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            SessionStatus::Pending => Err(GameError::conflict(
                codes::SESSION_ENDED,
                "session has not started",
            )),
            SessionStatus::Ended => Err(GameError::conflict(codes::SESSION_ENDED, "session ended")),
        }
    }

    pub fn resume(&mut self) -> Result<(), GameError> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::Active => Ok(()),
            _ => Err(GameError::conflict(codes::SESSION_ENDED, "session ended")),
        }
    }

    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), GameError> {
        if self.status == SessionStatus::Ended {
            return Err(GameError::conflict(
                codes::SESSION_ENDED,
                "session already ended",
            ));
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        Ok(())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
