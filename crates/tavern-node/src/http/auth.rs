// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tavern_core::error::{codes, FieldError, GameError};
use tavern_store::{StoreError, User};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::error::{ok, ApiError};

use super::middleware::Correlation;
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub refresh_token: String,
}

/// `POST /api/v1/auth/register`
pub async fn register(
    State(state): State<AppState>,
    Correlation(correlation): Correlation,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let fail = |e: GameError| ApiError::new(e, correlation.clone());
    validate_registration(&body).map_err(fail)?;

    let ctx = super::anon_ctx(&correlation);
    let user = User {
        id: Uuid::new_v4(),
        username: body.username.trim().to_string(),
        email: body.email.trim().to_string(),
        password_hash: hash_password(&body.password, state.config.auth.bcrypt_cost)
            .map_err(|e| ApiError::new(e, correlation.clone()))?,
        created_at: Utc::now(),
    };
    state.users.create(&ctx, &user).await.map_err(|e| {
        let e = match e {
            StoreError::Conflict(_) => {
                GameError::conflict(codes::USERNAME_TAKEN, "username already taken")
            }
            other => other.into(),
        };
        ApiError::new(e, correlation.clone())
    })?;

    let tokens = state
        .refresh
        .issue(&ctx, user.id, &user.username)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    Ok((
        StatusCode::CREATED,
        ok(
            &correlation,
            json!({ "user": public_user(&user), "tokens": tokens }),
        ),
    ))
}

/// `POST /api/v1/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Correlation(correlation): Correlation,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::anon_ctx(&correlation);
    let user = state
        .users
        .by_username(&ctx, body.username.trim())
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                GameError::authentication(codes::INVALID_CREDENTIALS),
                correlation.clone(),
            )
        })?;
    verify_password(&body.password, &user.password_hash)
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    let tokens = state
        .refresh
        .issue(&ctx, user.id, &user.username)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    Ok(ok(
        &correlation,
        json!({ "user": public_user(&user), "tokens": tokens }),
    ))
}

/// `POST /api/v1/auth/refresh` — rotate the presented refresh token.
pub async fn refresh(
    State(state): State<AppState>,
    Correlation(correlation): Correlation,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::anon_ctx(&correlation);
    let (user_id, raw) = state
        .refresh
        .rotate(&ctx, &body.refresh_token)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    let user = state
        .users
        .by_id(&ctx, user_id)
        .await
        .map_err(|e| ApiError::new(GameError::from(e), correlation.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                GameError::authentication(codes::TOKEN_INVALID),
                correlation.clone(),
            )
        })?;
    let tokens = state
        .refresh
        .pair_for(user.id, &user.username, raw)
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    Ok(ok(&correlation, json!({ "tokens": tokens })))
}

/// `POST /api/v1/auth/logout` — revoke the presented refresh token.
pub async fn logout(
    State(state): State<AppState>,
    Correlation(correlation): Correlation,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::anon_ctx(&correlation);
    state
        .refresh
        .revoke(&ctx, &body.refresh_token)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "loggedOut": true })))
}

fn validate_registration(body: &RegisterBody) -> Result<(), GameError> {
    let mut fields = Vec::new();
    let username = body.username.trim();
    if username.len() < 3 || username.len() > 32 {
        fields.push(FieldError::new("username", "must be 3–32 characters"));
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        fields.push(FieldError::new(
            "username",
            "letters, digits, '_' and '-' only",
        ));
    }
    if !body.email.contains('@') || body.email.len() > 254 {
        fields.push(FieldError::new("email", "must be a valid address"));
    }
    if body.password.len() < 8 {
        fields.push(FieldError::new("password", "must be at least 8 characters"));
    }
    if fields.is_empty() {
        Ok(())
    } else {
        Err(GameError::validation_fields(
            codes::INVALID_CREDENTIALS,
            "invalid registration",
            fields,
        ))
    }
}

/// The user shape we expose: never the password hash.
fn public_user(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "createdAt": user.created_at.to_rfc3339(),
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
