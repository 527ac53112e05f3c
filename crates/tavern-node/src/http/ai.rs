// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tavern_core::error::{codes, GameError};
use tavern_jobs::JobKind;
use uuid::Uuid;

use crate::error::{ok, ApiError};

use super::middleware::{AuthUser, Correlation};
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    /// One of the pipeline's job kinds, e.g. `npc_dialogue`.
    pub kind: String,
    pub session_id: Uuid,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `POST /api/v1/ai/generate` — enqueue a generation job. Returns the job
/// id immediately; the artifact arrives on the session stream as
/// `ai-artifact` when the pipeline finishes.
pub async fn generate(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Json(body): Json<GenerateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let kind = JobKind::parse(&body.kind).ok_or_else(|| {
        ApiError::new(
            GameError::validation(
                codes::BAD_REQUEST,
                format!("unknown generation kind {:?}", body.kind),
            ),
            correlation.clone(),
        )
    })?;

    let ctx = super::request_ctx(&correlation, user.user_id);
    // Membership gate — outsiders cannot tell this session from a missing
    // one.
    state
        .sessions
        .get(&ctx, user.user_id, body.session_id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    let job_id = state
        .pipeline
        .submit(&ctx, kind, body.session_id, user.user_id, body.payload)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;

    Ok((
        StatusCode::ACCEPTED,
        ok(&correlation, json!({ "jobId": job_id, "status": "queued" })),
    ))
}

/// `GET /api/v1/ai/jobs/:id` — poll a job. Requesters only.
pub async fn job_status(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let job = state
        .pipeline
        .status(&ctx, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    if job.user_id != user.user_id {
        return Err(ApiError::new(
            GameError::not_found(codes::JOB_NOT_FOUND, "job"),
            correlation,
        ));
    }
    Ok(ok(
        &correlation,
        json!({
            "jobId": job.id,
            "kind": job.kind,
            "status": job.status,
            "attempts": job.attempts,
            "result": job.result,
            "error": job.error,
        }),
    ))
}

/// `DELETE /api/v1/ai/jobs/:id` — cancel. Queued jobs cancel immediately;
/// running jobs are canceled best-effort at the next checkpoint.
pub async fn cancel(
    State(state): State<AppState>,
    user: AuthUser,
    Correlation(correlation): Correlation,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = super::request_ctx(&correlation, user.user_id);
    let job = state
        .pipeline
        .status(&ctx, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    if job.user_id != user.user_id {
        return Err(ApiError::new(
            GameError::not_found(codes::JOB_NOT_FOUND, "job"),
            correlation,
        ));
    }
    let status = state
        .pipeline
        .cancel(&ctx, id)
        .await
        .map_err(|e| ApiError::new(e, correlation.clone()))?;
    Ok(ok(&correlation, json!({ "jobId": id, "status": status })))
}
