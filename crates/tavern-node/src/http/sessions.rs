// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tavern_core::{JoinCode, SessionStatus};
use tavern_store::PageRequest;
use uuid::Uuid;

use crate::error::{ok, ApiError};
use crate::services::sessions::SessionRef;

use super::middleware::{AuthUser, Correlation};
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub name: String,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
}

fn default_max_participants() -> u32 {
    6
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBody {
    #[serde(default)]
    pub character_id: Option<Uuid>,
    /// When set, the join resolves by code instead of the path id.
    #[serde(default)]
    pub join_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickBody {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// `POST /api/v1/sessions` — the caller becomes the director.
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let session = state
        .sessions
        .create(&ctx, user.user_id, body.name, body.max_participants)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok((StatusCode::CREATED, ok(&correlation, json!(session))))
}

/// `GET /api/v1/sessions`
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("active") => SessionStatus::Active,
        Some("pending") => SessionStatus::Pending,
        Some("paused") => SessionStatus::Paused,
        Some("ended") => SessionStatus::Ended,
        Some(other) => {
            return Err(ApiError::new(
                tavern_core::error::GameError::validation(
                    tavern_core::error::codes::BAD_REQUEST,
                    format!("unknown status filter {other:?}"),
                ),
                correlation,
            ))
        }
    };
    let page = PageRequest::Offset {
        page: query.page.unwrap_or(0),
        limit: query.limit.unwrap_or(20),
    };
    let ctx = super::request_ctx(&correlation, user.user_id);
    let sessions = state
        .sessions
        .list(&ctx, status, &page)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!(sessions)))
}

/// `GET /api/v1/sessions/:id` — members only; outsiders see `not-found`.
pub async fn fetch(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let (session, participants) = state
        .sessions
        .get(&ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(
        &correlation,
        json!({ "session": session, "participants": participants }),
    ))
}

/// `POST /api/v1/sessions/:id/join`
pub async fn join(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
    Json(body): Json<JoinBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let session_ref = match body.join_code {
        Some(code) => SessionRef::Code(
            JoinCode::parse(&code).map_err(|e| ApiError::new(e, correlation.clone()))?,
        ),
        None => SessionRef::Id(id),
    };
    let participant = state
        .sessions
        .join(&ctx, user.user_id, session_ref, body.character_id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!(participant)))
}

/// `POST /api/v1/sessions/:id/leave`
pub async fn leave(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .sessions
        .leave(&ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "left": id })))
}

/// `POST /api/v1/sessions/:id/kick` — director only.
pub async fn kick(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
    Json(body): Json<KickBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .sessions
        .kick(&ctx, user.user_id, id, body.user_id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "kicked": body.user_id })))
}

/// `POST /api/v1/sessions/:id/pause` — director only.
pub async fn pause(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .sessions
        .pause(&ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "paused": id })))
}

/// `POST /api/v1/sessions/:id/resume` — director only.
pub async fn resume(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .sessions
        .resume(&ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "resumed": id })))
}

/// `POST /api/v1/sessions/:id/end` — director only; terminal.
pub async fn end(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    state
        .sessions
        .end(&ctx, user.user_id, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "ended": id })))
}
