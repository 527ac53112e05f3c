// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::StoreError;

/// Request-scoped execution context threaded through every query.
///
/// Carries the correlation id (stamped by the HTTP edge), the acting user
/// and an optional deadline. The query log includes the correlation id so a
/// slow request can be traced through every statement it issued.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub correlation_id: String,
    pub user_id: Option<Uuid>,
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user_id: None,
            deadline: None,
        }
    }

    /// Context for internal work (workers, probes) with a fresh correlation id.
    pub fn internal(label: &str) -> Self {
        Self::new(format!("{label}-{}", Uuid::new_v4()))
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the deadline has elapsed — checked before each query
    /// so a request that ran out of budget never reaches the store.
    pub fn check_deadline(&self) -> Result<(), StoreError> {
        match self.remaining() {
            Some(left) if left.is_zero() => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
