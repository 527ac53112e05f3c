// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tavern_store::PageRequest;
use uuid::Uuid;

use crate::error::{ok, ApiError};
use crate::services::RollParams;

use super::middleware::{AuthUser, Correlation};
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollBody {
    pub notation: String,
    #[serde(default)]
    pub modifier: Option<i64>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub character_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// `POST /api/v1/dice/roll`
pub async fn roll(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Json(body): Json<RollBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let roll = state
        .dice
        .roll(
            &ctx,
            RollParams {
                user_id: user.user_id,
                session_id: body.session_id,
                character_id: body.character_id,
                notation: body.notation,
                modifier: body.modifier.unwrap_or(0),
                purpose: body.purpose,
            },
        )
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!(roll)))
}

/// `GET /api/v1/sessions/:id/rolls` — the session's dice log. Offset form
/// with `page`, cursor form with `cursor`; cursor ordering survives
/// concurrent inserts.
pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(session_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(20);
    let page = match (&query.cursor, query.page) {
        (Some(cursor), _) => PageRequest::Cursor {
            after: Some(cursor.clone()),
            limit,
        },
        (None, Some(page)) => PageRequest::Offset { page, limit },
        (None, None) => PageRequest::Cursor { after: None, limit },
    };
    let ctx = super::request_ctx(&correlation, user.user_id);
    let result = state
        .dice
        .history(&ctx, session_id, &page)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(
        &correlation,
        json!({ "rolls": result.items, "nextCursor": result.next_cursor }),
    ))
}
