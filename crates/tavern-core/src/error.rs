// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The failure taxonomy shared by every service in the server.
//!
//! Services return [`GameError`]; handlers translate it into the REST
//! envelope (or a WebSocket close reason) using [`GameError::kind`] and the
//! stable [`GameError::code`]. Codes are part of the API contract — clients
//! switch on them — so they never change once shipped.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure class. Determines the HTTP status and whether a retry can
/// help (rate-limit and upstream are transient, the rest are not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Upstream,
    Internal,
}

/// One offending field in a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("authentication failed")]
    Authentication { code: &'static str },

    /// Deliberately carries no detail: where existence must not leak
    /// (sessions owned by others), callers map both this and `NotFound`
    /// to the same surface response.
    #[error("not authorized")]
    Authorization { code: &'static str },

    #[error("{entity} not found")]
    NotFound {
        code: &'static str,
        entity: &'static str,
    },

    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
    },

    #[error("rate limited")]
    RateLimit { retry_after: Duration },

    #[error("upstream failure: {message}")]
    Upstream {
        code: &'static str,
        message: String,
    },

    /// The message is for the log only; the API surface renders a generic
    /// string plus the correlation id.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GameError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn validation_fields(
        code: &'static str,
        message: impl Into<String>,
        fields: Vec<FieldError>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            fields,
        }
    }

    pub fn authentication(code: &'static str) -> Self {
        Self::Authentication { code }
    }

    pub fn authorization(code: &'static str) -> Self {
        Self::Authorization { code }
    }

    pub fn not_found(code: &'static str, entity: &'static str) -> Self {
        Self::NotFound { code, entity }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn upstream(code: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, e.g. `SESSION_CAPACITY_EXCEEDED`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. }
            | Self::Authentication { code }
            | Self::Authorization { code }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. }
            | Self::Upstream { code, .. } => code,
            Self::RateLimit { .. } => codes::RATE_LIMIT_EXCEEDED,
            Self::Internal { .. } => codes::INTERNAL_ERROR,
        }
    }
}

/// The stable code vocabulary. Grouped by subsystem; append-only.
pub mod codes {
    // Auth
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_REUSED: &str = "TOKEN_REUSED";
    pub const USERNAME_TAKEN: &str = "USERNAME_TAKEN";
    pub const NOT_AUTHORIZED: &str = "NOT_AUTHORIZED";
    pub const DIRECTOR_ONLY: &str = "DIRECTOR_ONLY";

    // Sessions
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const SESSION_ENDED: &str = "SESSION_ENDED";
    pub const SESSION_CAPACITY_EXCEEDED: &str = "SESSION_CAPACITY_EXCEEDED";
    pub const ALREADY_JOINED: &str = "ALREADY_JOINED";
    pub const NOT_A_PARTICIPANT: &str = "NOT_A_PARTICIPANT";
    pub const STATE_BAG_UNKNOWN_VERSION: &str = "STATE_BAG_UNKNOWN_VERSION";

    // Characters
    pub const CHARACTER_NOT_FOUND: &str = "CHARACTER_NOT_FOUND";
    pub const CHARACTER_INVALID: &str = "CHARACTER_INVALID";
    pub const CHARACTER_NOT_OWNED: &str = "CHARACTER_NOT_OWNED";

    // Combat
    pub const COMBAT_NOT_FOUND: &str = "COMBAT_NOT_FOUND";
    pub const COMBAT_NOT_ACTIVE: &str = "COMBAT_NOT_ACTIVE";
    pub const COMBAT_ALREADY_ACTIVE: &str = "COMBAT_ALREADY_ACTIVE";
    pub const COMBATANT_NOT_FOUND: &str = "COMBATANT_NOT_FOUND";
    pub const NOT_YOUR_TURN: &str = "NOT_YOUR_TURN";
    pub const COMBAT_EMPTY: &str = "COMBAT_EMPTY";

    // Dice
    pub const BAD_NOTATION: &str = "BAD_NOTATION";

    // AI pipeline
    pub const JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
    pub const PROVIDER_UNAVAILABLE: &str = "PROVIDER_UNAVAILABLE";
    pub const PROVIDER_REJECTED: &str = "PROVIDER_REJECTED";

    // Generic
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const RESOURCE_CONFLICT: &str = "RESOURCE_CONFLICT";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

// ── Unit tests ────────────────────────────────────────────────────────────────
