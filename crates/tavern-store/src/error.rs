// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tavern_core::error::{codes, GameError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("malformed stored value: {0}")]
    Corrupt(String),

    #[error("malformed cursor token")]
    BadCursor,

    /// A refresh token was presented twice. The whole family is revoked
    /// before this surfaces.
    #[error("refresh token reused")]
    TokenReused,

    #[error("dialect-native placeholder in query: {0}")]
    ForbiddenPlaceholder(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound { entity: "row" },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Translation into the service-level taxonomy. Database faults become
/// `upstream` (transient, retryable at the worker layer); everything else
/// maps onto its obvious kind.
impl From<StoreError> for GameError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity } => {
                GameError::not_found(codes::RESOURCE_NOT_FOUND, entity)
            }
            StoreError::Conflict(msg) => GameError::conflict(codes::RESOURCE_CONFLICT, msg),
            StoreError::BadCursor => {
                GameError::validation(codes::BAD_REQUEST, "malformed cursor token")
            }
            StoreError::DeadlineExceeded => {
                GameError::upstream(codes::STORE_UNAVAILABLE, "query deadline exceeded")
            }
            StoreError::TokenReused => GameError::authentication(codes::TOKEN_REUSED),
            StoreError::Database(msg) => GameError::upstream(codes::STORE_UNAVAILABLE, msg),
            StoreError::Corrupt(msg) | StoreError::ForbiddenPlaceholder(msg) => {
                GameError::internal(msg)
            }
        }
    }
}
