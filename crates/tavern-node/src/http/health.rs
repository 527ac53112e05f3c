// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::error::ok;

use super::middleware::{AuthUser, Correlation};
use super::AppState;

/// `GET /health` — overall status.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let degraded = state.db.health().is_degraded();
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
    }))
}

/// `GET /health/live` — the process is up.
pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready` — ready to take traffic. A degraded store pool
/// surfaces here as 503 so the edge can drain this instance.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let probe_ok = state.db.probe().await;
    if probe_ok {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "store degraded" })),
        )
    }
}

/// `GET /health/details` — authenticated variant with pool counters.
pub async fn details(
    State(state): State<AppState>,
    _user: AuthUser,
    Correlation(correlation): Correlation,
) -> Json<serde_json::Value> {
    let health = state.db.health();
    ok(
        &correlation,
        json!({
            "uptimeSecs": state.started_at.elapsed().as_secs(),
            "store": {
                "degraded": health.is_degraded(),
                "probes": health.probes(),
                "probeFailures": health.failures(),
            },
            "environment": state.config.env,
        }),
    )
}
