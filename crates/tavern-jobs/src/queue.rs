// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::job::Priority;

/// Three strict-priority dispatch queues plus a wakeup for idle workers.
///
/// Only job ids live here — the durable record is in the store. Strictness
/// is per-pop: a critical job enqueued while workers chew on low-priority
/// jobs is picked up by the next free worker, but nothing preempts a job
/// already in flight.
pub struct DispatchQueues {
    lanes: Mutex<Lanes>,
    wakeup: Notify,
}

#[derive(Default)]
struct Lanes {
    critical: VecDeque<Uuid>,
    default: VecDeque<Uuid>,
    low: VecDeque<Uuid>,
}

impl Lanes {
    fn lane(&mut self, priority: Priority) -> &mut VecDeque<Uuid> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::Default => &mut self.default,
            Priority::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<Uuid> {
        self.critical
            .pop_front()
            .or_else(|| self.default.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn contains(&self, id: Uuid) -> bool {
        self.critical.contains(&id) || self.default.contains(&id) || self.low.contains(&id)
    }
}

impl DispatchQueues {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            wakeup: Notify::new(),
        }
    }

    /// Enqueue a job id; duplicates are dropped (a retry may race the
    /// recovery scan).
    pub fn push(&self, id: Uuid, priority: Priority) {
        {
            let mut lanes = self.lanes.lock().expect("queue lock poisoned");
            if lanes.contains(id) {
                return;
            }
            lanes.lane(priority).push_back(id);
        }
        self.wakeup.notify_one();
    }

    /// Take the next job id in strict priority order, or `None` when all
    /// lanes are empty.
    pub fn try_pop(&self) -> Option<Uuid> {
        self.lanes.lock().expect("queue lock poisoned").pop()
    }

    /// Wait until [`DispatchQueues::push`] lands something. Spurious wakes
    /// are fine — callers loop on [`DispatchQueues::try_pop`].
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock().expect("queue lock poisoned");
        lanes.critical.len() + lanes.default.len() + lanes.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatchQueues {
    fn default() -> Self {
        Self::new()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
