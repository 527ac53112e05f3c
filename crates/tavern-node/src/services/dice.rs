// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
use tavern_core::dice::{DiceRoll, Notation, Roller};
use tavern_core::error::GameError;
use tavern_core::GameEvent;
use tavern_store::{DiceRollRepo, PageRequest, PageResult, QueryContext};
use tracing::warn;
use uuid::Uuid;

use crate::hub::HubHandle;

/// Rolls dice, logs them, and broadcasts the outcome to the session.
pub struct DiceService {
    rolls: DiceRollRepo,
    hub: HubHandle,
}

pub struct RollParams {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub character_id: Option<Uuid>,
    pub notation: String,
    /// Extra flat bonus on top of the notation's own constants.
    pub modifier: i64,
    pub purpose: Option<String>,
}

impl DiceService {
    pub fn new(rolls: DiceRollRepo, hub: HubHandle) -> Self {
        Self { rolls, hub }
    }

    /// Roll, persist, broadcast.
    ///
    /// The roll is seeded from the clock and the seed is persisted, so an
    /// audit can reprint it. A roll whose persistence fails is still
    /// returned to the caller, flagged `unlogged`, and NOT broadcast — an
    /// unlogged roll must not enter the shared record.
    pub async fn roll(
        &self,
        ctx: &QueryContext,
        params: RollParams,
    ) -> Result<DiceRoll, GameError> {
        let notation: Notation = params.notation.parse()?;
        let seed = clock_seed();
        let mut roller = Roller::from_seed(seed);
        let outcome = roller.roll(&notation)?;

        let mut roll = DiceRoll {
            id: Uuid::new_v4(),
            session_id: params.session_id,
            user_id: params.user_id,
            character_id: params.character_id,
            notation: params.notation,
            results: outcome.faces.clone(),
            modifier: outcome.flat_modifier + params.modifier,
            total: outcome.total() + params.modifier,
            purpose: params.purpose.unwrap_or_else(|| "general".to_string()),
            seed,
            unlogged: false,
            rolled_at: Utc::now(),
        };

        match self.rolls.insert(ctx, &roll).await {
            Ok(()) => {
                if let Some(session_id) = roll.session_id {
                    let _ = self
                        .hub
                        .publish(
                            session_id,
                            GameEvent::DiceRoll { roll: roll.clone() },
                            ctx.correlation_id.clone(),
                        )
                        .await;
                }
            }
            Err(e) => {
                warn!(correlation_id = %ctx.correlation_id, "dice roll not logged: {e}");
                roll.unlogged = true;
            }
        }
        Ok(roll)
    }

    pub async fn history(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
        page: &PageRequest,
    ) -> Result<PageResult<DiceRoll>, GameError> {
        Ok(self.rolls.list_by_session(ctx, session_id, page).await?)
    }
}

fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
