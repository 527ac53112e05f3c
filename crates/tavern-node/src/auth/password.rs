// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tavern_core::error::{codes, GameError};

/// bcrypt-hash a password with the configured work factor.
pub fn hash_password(password: &str, cost: u32) -> Result<String, GameError> {
    if password.len() < 8 {
        return Err(GameError::validation(
            codes::INVALID_CREDENTIALS,
            "password must be at least 8 characters",
        ));
    }
    // bcrypt truncates at 72 bytes; refuse rather than silently weaken.
    if password.len() > 72 {
        return Err(GameError::validation(
            codes::INVALID_CREDENTIALS,
            "password must be at most 72 characters",
        ));
    }
    bcrypt::hash(password, cost).map_err(|e| GameError::internal(format!("bcrypt: {e}")))
}

/// Verify a password against a stored hash. Wrong passwords and malformed
/// hashes are deliberately the same failure.
pub fn verify_password(password: &str, hash: &str) -> Result<(), GameError> {
    match bcrypt::verify(password, hash) {
        Ok(true) => Ok(()),
        _ => Err(GameError::authentication(codes::INVALID_CREDENTIALS)),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
