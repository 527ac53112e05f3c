// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

/// List pagination, in both spec'd forms.
///
/// Offset paging is simple but shifts under concurrent inserts; the cursor
/// form is keyset-based on (created_at, id) so ordering is stable across
/// inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Offset { page: u32, limit: u32 },
    Cursor { after: Option<String>, limit: u32 },
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest::Offset {
            page: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn limit(&self) -> u32 {
        let raw = match self {
            PageRequest::Offset { limit, .. } | PageRequest::Cursor { limit, .. } => *limit,
        };
        raw.clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        match self {
            PageRequest::Offset { page, .. } => page * self.limit(),
            PageRequest::Cursor { .. } => 0,
        }
    }
}

/// Opaque keyset cursor: (created_at, id) of the last item on the page,
/// base64url-encoded JSON. Clients treat it as a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, StoreError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| StoreError::BadCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)
    }
}

/// One page of results plus the continuation token, when more may exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> PageResult<T> {
    /// Build a page from `limit + 1` fetched rows: the sentinel row proves
    /// another page exists and supplies nothing else.
    pub fn from_overfetch(
        mut items: Vec<T>,
        limit: u32,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Self {
        let has_more = items.len() > limit as usize;
        if has_more {
            items.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            items.last().map(|t| cursor_of(t).encode())
        } else {
            None
        };
        Self { items, next_cursor }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let back = Cursor::decode(&c.encode()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn garbage_cursor_rejected() {
        assert!(matches!(
            Cursor::decode("not-base64!!"),
            Err(StoreError::BadCursor)
        ));
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"nope\":1}");
        assert!(matches!(Cursor::decode(&b64), Err(StoreError::BadCursor)));
    }

    #[test]
    fn limit_clamped_to_bounds() {
        let req = PageRequest::Offset { page: 2, limit: 0 };
        assert_eq!(req.limit(), 1);
        let req = PageRequest::Offset {
            page: 2,
            limit: 9999,
        };
        assert_eq!(req.limit(), MAX_LIMIT);
        assert_eq!(req.offset(), 2 * MAX_LIMIT);
    }

    #[test]
    fn overfetch_detects_more_pages() {
        let items: Vec<u32> = (0..6).collect();
        let page = PageResult::from_overfetch(items, 5, |_| Cursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        });
        assert_eq!(page.items.len(), 5);
        assert!(page.next_cursor.is_some());

        let page = PageResult::from_overfetch(vec![1u32, 2], 5, |_| Cursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        });
        assert!(page.next_cursor.is_none());
    }
}
