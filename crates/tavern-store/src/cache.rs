// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-local response cache with request deduplication.
//!
//! Read results are memoized keyed by (repository, method, argument
//! fingerprint, user scope). Entries are immutable once inserted — readers
//! deserialize their own copy — and carry a TTL. Writes invalidate by
//! (repository, dependent-method-set). Concurrent identical reads collapse
//! into one underlying query via a per-key in-flight lock: the first caller
//! loads, the rest find the fresh entry on re-check.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

const SHARDS: usize = 16;
const PER_SHARD_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    repo: &'static str,
    method: &'static str,
    args: String,
    scope: Option<uuid::Uuid>,
}

#[derive(Clone)]
struct Entry {
    value: Arc<serde_json::Value>,
    inserted: Instant,
    ttl: Duration,
}

impl Entry {
    fn fresh(&self) -> bool {
        self.inserted.elapsed() < self.ttl
    }
}

struct Shard {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    inflight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(PER_SHARD_CAPACITY).expect("capacity is non-zero"),
            )),
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

pub struct ResponseCache {
    shards: Vec<Shard>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Shard::new()).collect(),
            default_ttl,
        }
    }

    fn shard(&self, key: &CacheKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    /// Fetch a memoized read or run `load` to fill it.
    ///
    /// `args` must uniquely fingerprint the query arguments; `scope` is the
    /// user id for user-scoped reads (`None` for global reads).
    pub async fn get_or_load<T, A, F, Fut>(
        &self,
        repo: &'static str,
        method: &'static str,
        args: &A,
        scope: Option<uuid::Uuid>,
        ttl: Option<Duration>,
        load: F,
    ) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let key = CacheKey {
            repo,
            method,
            args: serde_json::to_string(args)?,
            scope,
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        let shard = self.shard(&key);

        if let Some(hit) = lookup(shard, &key)? {
            return Ok(hit);
        }

        // Single-flight: one loader per key; everyone else waits on the
        // key lock, then finds the entry on re-check.
        let gate = {
            let mut inflight = shard.inflight.lock().expect("inflight lock poisoned");
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _held = gate.lock().await;

        if let Some(hit) = lookup(shard, &key)? {
            release(shard, &key);
            return Ok(hit);
        }

        let result = load().await;
        if let Ok(value) = &result {
            let entry = Entry {
                value: Arc::new(serde_json::to_value(value)?),
                inserted: Instant::now(),
                ttl,
            };
            shard
                .entries
                .lock()
                .expect("entries lock poisoned")
                .put(key.clone(), entry);
        }
        release(shard, &key);
        result
    }

    /// Drop every entry of `repo` whose method is in `methods`.
    /// Called by write paths with their dependent read set.
    pub fn invalidate(&self, repo: &'static str, methods: &[&str]) {
        for shard in &self.shards {
            let mut entries = shard.entries.lock().expect("entries lock poisoned");
            let doomed: Vec<CacheKey> = entries
                .iter()
                .filter(|(k, _)| k.repo == repo && methods.contains(&k.method))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                entries.pop(&key);
            }
        }
    }

    /// Drop everything (tests, admin surface).
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.entries.lock().expect("entries lock poisoned").clear();
        }
    }
}

fn lookup<T: DeserializeOwned>(shard: &Shard, key: &CacheKey) -> Result<Option<T>, StoreError> {
    let mut entries = shard.entries.lock().expect("entries lock poisoned");
    // Clone the Arc out of the borrow first; a stale entry is popped below.
    let fresh_value = match entries.get(key) {
        Some(entry) if entry.fresh() => Some(entry.value.clone()),
        Some(_) => None,
        None => return Ok(None),
    };
    match fresh_value {
        Some(value) => {
            drop(entries);
            Ok(Some(serde_json::from_value((*value).clone())?))
        }
        None => {
            entries.pop(key);
            Ok(None)
        }
    }
}

fn release(shard: &Shard, key: &CacheKey) {
    shard
        .inflight
        .lock()
        .expect("inflight lock poisoned")
        .remove(key);
}

// ── Unit tests ────────────────────────────────────────────────────────────────
