// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tavern_core::error::{codes, GameError};
use tavern_core::{AbilityScores, Character, SpellSlots};
use tavern_store::QueryContext;
use uuid::Uuid;

use crate::error::{ok, ApiError};

use super::middleware::{AuthUser, Correlation};
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterBody {
    pub name: String,
    pub race: String,
    pub class: String,
    pub level: u8,
    pub max_hp: i32,
    #[serde(default)]
    pub current_hp: Option<i32>,
    pub armor_class: i32,
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default)]
    pub initiative_bonus: i32,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub proficiencies: Vec<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub spell_slots: SpellSlots,
}

fn default_speed() -> u32 {
    30
}

/// `POST /api/v1/characters`
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Json(body): Json<CharacterBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let character = from_body(Uuid::new_v4(), user.user_id, Utc::now(), body);
    character
        .validate()
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .characters
        .create(&ctx, &character)
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?;
    Ok((StatusCode::CREATED, ok(&correlation, json!(character))))
}

/// `GET /api/v1/characters`
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let characters = state
        .characters
        .list_by_owner(&ctx, user.user_id)
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?;
    Ok(ok(&correlation, json!(characters)))
}

/// `GET /api/v1/characters/:id`
pub async fn fetch(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let character = owned_character(&state, &ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!(character)))
}

/// `PUT /api/v1/characters/:id`
pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
    Json(body): Json<CharacterBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let existing = owned_character(&state, &ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    // HP carries over unless the body sets it explicitly, clamped by the
    // (possibly new) maximum.
    let explicit_hp = body.current_hp;
    let mut updated = from_body(existing.id, existing.owner_id, existing.created_at, body);
    if explicit_hp.is_none() {
        updated.current_hp = existing.current_hp.min(updated.max_hp);
    }
    updated
        .validate()
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    state
        .characters
        .update(&ctx, &updated)
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?;
    Ok(ok(&correlation, json!(updated)))
}

/// `DELETE /api/v1/characters/:id`
pub async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    owned_character(&state, &ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    state
        .characters
        .delete(&ctx, id)
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?;
    Ok(ok(&correlation, json!({ "deleted": id })))
}

/// Fetch a character the caller owns. Someone else's character reads as
/// `not-found` — ownership must not leak.
async fn owned_character(
    state: &AppState,
    ctx: &QueryContext,
    user_id: Uuid,
    id: Uuid,
) -> Result<Character, GameError> {
    state
        .characters
        .by_id(ctx, id)
        .await?
        .filter(|c| c.owner_id == user_id)
        .ok_or_else(|| GameError::not_found(codes::CHARACTER_NOT_FOUND, "character"))
}

fn from_body(
    id: Uuid,
    owner_id: Uuid,
    created_at: chrono::DateTime<Utc>,
    body: CharacterBody,
) -> Character {
    let current_hp = body.current_hp.unwrap_or(body.max_hp);
    Character {
        id,
        owner_id,
        name: body.name,
        race: body.race,
        class: body.class,
        level: body.level,
        current_hp,
        max_hp: body.max_hp,
        armor_class: body.armor_class,
        abilities: body.abilities,
        initiative_bonus: body.initiative_bonus,
        speed: body.speed,
        proficiencies: body.proficiencies,
        equipment: body.equipment,
        spell_slots: body.spell_slots,
        created_at,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
