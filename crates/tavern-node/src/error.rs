// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! REST response envelope and error translation.
//!
//! Every REST response is `{success, data?, error?, requestId, timestamp}`;
//! errors carry the taxonomy kind, a stable code and a message. Internal
//! errors log their detail against the correlation id and surface a
//! generic message — stack traces and internal strings never leave the
//! process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tavern_core::error::{ErrorKind, GameError};
use tracing::error;

/// Success envelope.
pub fn ok<T: Serialize>(correlation_id: &str, data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
        "requestId": correlation_id,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// A failed request: the domain error plus the correlation id it happened
/// under.
#[derive(Debug)]
pub struct ApiError {
    pub error: GameError,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(error: impl Into<GameError>, correlation_id: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Upstream => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status = status_for(kind);

        // The generic message for internal faults; detail goes to the log
        // with the correlation id.
        let message = match &self.error {
            GameError::Internal { message } => {
                error!(correlation_id = %self.correlation_id, "internal error: {message}");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut error_body = json!({
            "type": kind,
            "code": self.error.code(),
            "message": message,
        });
        if let GameError::Validation { fields, .. } = &self.error {
            if !fields.is_empty() {
                error_body["details"] = json!({ "fields": fields });
            }
        }

        let body = Json(json!({
            "success": false,
            "error": error_body,
            "requestId": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        let mut response = (status, body).into_response();
        if let GameError::RateLimit { retry_after } = &self.error {
            if let Ok(value) =
                axum::http::HeaderValue::from_str(&retry_after.as_secs().to_string())
            {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
