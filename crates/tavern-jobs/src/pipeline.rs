// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The pipeline service: submission API, worker pool and retry scheduler.
//!
//! # Design
//!
//! ```text
//!   submit() ──► ai_jobs row (queued) ──► DispatchQueues ──► worker pool
//!                      ▲                        ▲               │
//!                      │   schedule_retry       │ scheduler     │ provider call
//!                      └────────────────────────┴───────────────┘ (deadline-bound)
//! ```
//!
//! The durable record in `ai_jobs` is authoritative; the in-memory queues
//! only order dispatch. Retries never sleep in a worker: a transient
//! failure writes `next_attempt_at` and returns the worker to the pool,
//! and the scheduler re-enqueues the job when its timestamp arrives. The
//! same scan recovers queued jobs after a restart, so delivery is
//! at-least-once end to end (claims are idempotent — a second worker
//! popping the same id loses the `queued → running` transition and moves
//! on).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tavern_core::error::{codes, GameError};
use tavern_core::GameEvent;
use tavern_model::{AiProvider, ProviderError};
use tavern_store::{AiJobRecord, AiJobRepo, JobStatus, QueryContext};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::job::{idempotency_key, JobKind, PipelineConfig};
use crate::queue::DispatchQueues;

/// Where finished artifacts go: the session hub, in production.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn publish(&self, session_id: Uuid, event: GameEvent);
}

pub struct JobPipeline {
    repo: AiJobRepo,
    provider: Arc<dyn AiProvider>,
    sink: Arc<dyn ArtifactSink>,
    queues: DispatchQueues,
    canceled: Mutex<HashSet<Uuid>>,
    config: PipelineConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl JobPipeline {
    pub fn new(
        repo: AiJobRepo,
        provider: Arc<dyn AiProvider>,
        sink: Arc<dyn ArtifactSink>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            repo,
            provider,
            sink,
            queues: DispatchQueues::new(),
            canceled: Mutex::new(HashSet::new()),
            config,
            shutdown_tx,
        })
    }

    /// Spawn the scheduler and the worker pool. Tasks run until
    /// [`JobPipeline::shutdown`].
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        handles.push(tokio::spawn(self.clone().run_scheduler()));
        for n in 0..self.config.workers {
            handles.push(tokio::spawn(self.clone().run_worker(n)));
        }
        handles
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // ── Submission API ────────────────────────────────────────────────────────

    /// Enqueue a generation job; returns the job id immediately.
    ///
    /// Duplicate submits of the same (kind, session, payload) inside the
    /// idempotency window return the existing job id instead of creating
    /// a second job.
    pub async fn submit(
        &self,
        ctx: &QueryContext,
        kind: JobKind,
        session_id: Uuid,
        user_id: Uuid,
        payload: Value,
    ) -> Result<Uuid, GameError> {
        let key = idempotency_key(kind, session_id, &payload);
        let window_start = Utc::now()
            - ChronoDuration::from_std(self.config.idempotency_window)
                .unwrap_or_else(|_| ChronoDuration::seconds(60));
        if let Some(existing) = self.repo.by_idempotency_key(ctx, &key, window_start).await? {
            debug!(job = %existing.id, "duplicate submit resolved to existing job");
            return Ok(existing.id);
        }

        let now = Utc::now();
        let record = AiJobRecord {
            id: Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            session_id,
            user_id,
            payload,
            idempotency_key: key,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            next_attempt_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(ctx, &record).await?;
        self.queues.push(record.id, kind.priority());
        info!(job = %record.id, kind = kind.as_str(), session = %session_id, "job queued");
        Ok(record.id)
    }

    /// Cancel a job. Queued jobs cancel immediately; a running job observes
    /// the flag at its next checkpoint (best effort).
    pub async fn cancel(&self, ctx: &QueryContext, id: Uuid) -> Result<JobStatus, GameError> {
        self.canceled.lock().expect("cancel lock poisoned").insert(id);
        Ok(self.repo.cancel(ctx, id).await?)
    }

    pub async fn status(&self, ctx: &QueryContext, id: Uuid) -> Result<AiJobRecord, GameError> {
        self.repo
            .by_id(ctx, id)
            .await?
            .ok_or_else(|| GameError::not_found(codes::JOB_NOT_FOUND, "job"))
    }

    // ── Scheduler ─────────────────────────────────────────────────────────────

    /// Re-enqueue jobs whose `next_attempt_at` arrived, and recover queued
    /// jobs after a restart. The durable timestamps make this loop
    /// stateless — ticking is just "anything due yet?".
    async fn run_scheduler(self: Arc<Self>) {
        let ctx = QueryContext::internal("job-scheduler");
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut tick = tokio::time::interval(self.config.scheduler_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => break,
            }
            match self.repo.due(&ctx, Utc::now(), 64).await {
                Ok(due) => {
                    for job in due {
                        let priority = JobKind::parse(&job.kind)
                            .map(JobKind::priority)
                            .unwrap_or(crate::job::Priority::Low);
                        self.queues.push(job.id, priority);
                    }
                }
                Err(e) => warn!("scheduler scan failed: {e}"),
            }
        }
    }

    // ── Workers ───────────────────────────────────────────────────────────────

    async fn run_worker(self: Arc<Self>, n: usize) {
        let ctx = QueryContext::internal(&format!("job-worker-{n}"));
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(worker = n, "job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.queues.try_pop() {
                Some(id) => self.process(&ctx, id).await,
                None => {
                    tokio::select! {
                        _ = self.queues.wait() => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        debug!(worker = n, "job worker stopped");
    }

    async fn process(&self, ctx: &QueryContext, id: Uuid) {
        // Checkpoint: a cancel that landed while the job sat in the queue.
        if self.take_cancel(id) {
            debug!(job = %id, "skipping canceled job");
            return;
        }
        match self.repo.mark_running(ctx, id).await {
            Ok(true) => {}
            Ok(false) => return, // lost the claim, or no longer queued
            Err(e) => {
                warn!(job = %id, "claim failed: {e}");
                return;
            }
        }
        let job = match self.repo.by_id(ctx, id).await {
            Ok(Some(job)) => job,
            Ok(None) | Err(_) => return,
        };
        let Some(kind) = JobKind::parse(&job.kind) else {
            let _ = self.repo.fail(ctx, id, "unknown job kind").await;
            return;
        };

        let request = kind.request(&job.payload);
        let outcome =
            tokio::time::timeout(self.config.job_deadline, self.provider.generate(request)).await;

        // Checkpoint: a cancel that landed during the provider call.
        if self.take_cancel(id) {
            let _ = self.repo.cancel(ctx, id).await;
            info!(job = %id, "job canceled at checkpoint");
            return;
        }

        match outcome {
            Ok(Ok(generation)) => {
                if let Err(e) = self.repo.complete(ctx, id, &generation.text).await {
                    warn!(job = %id, "completing job failed: {e}");
                    return;
                }
                info!(job = %id, attempts = job.attempts, "job succeeded");
                self.sink
                    .publish(
                        job.session_id,
                        GameEvent::AiArtifact {
                            job_id: id,
                            kind: job.kind.clone(),
                            content: generation.text,
                        },
                    )
                    .await;
            }
            Ok(Err(ProviderError::Canceled)) => {
                let _ = self.repo.cancel(ctx, id).await;
            }
            Ok(Err(e)) if e.is_transient() => {
                self.retry_or_bury(ctx, &job, &e.to_string()).await;
            }
            Ok(Err(e)) => {
                warn!(job = %id, "permanent failure: {e}");
                let _ = self.repo.fail(ctx, id, &e.to_string()).await;
            }
            Err(_) => {
                self.retry_or_bury(ctx, &job, "job deadline exceeded").await;
            }
        }
    }

    /// Transient failure: schedule the next attempt, or dead-letter the job
    /// when its budget is spent.
    async fn retry_or_bury(&self, ctx: &QueryContext, job: &AiJobRecord, error: &str) {
        // The claim already incremented `attempts`, so it counts the
        // attempt that just failed.
        let attempt = job.attempts;
        if attempt >= job.max_attempts {
            warn!(job = %job.id, attempts = attempt, "job exhausted retries: {error}");
            let _ = self
                .repo
                .mark_dead(ctx, job.id, &format!("exhausted {attempt} attempts: {error}"))
                .await;
            return;
        }
        let delay = self
            .config
            .backoff
            .delay(attempt, &mut rand::thread_rng());
        let next = Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(1));
        debug!(job = %job.id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        let _ = self.repo.schedule_retry(ctx, job.id, next, error).await;
    }

    fn take_cancel(&self, id: Uuid) -> bool {
        self.canceled.lock().expect("cancel lock poisoned").remove(&id)
    }
}

impl PipelineConfig {
    fn scheduler_interval(&self) -> std::time::Duration {
        // A fraction of the backoff base keeps retry latency proportional
        // to the configured pace without a dedicated knob.
        (self.backoff.base / 2).max(std::time::Duration::from_millis(10))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tavern_model::{MockProvider, ScriptedMockProvider};
    use tavern_store::Database;

    use crate::Backoff;

    use super::*;

    struct RecordingSink {
        events: Mutex<Vec<(Uuid, GameEvent)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn artifacts(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| matches!(e, GameEvent::AiArtifact { .. }))
                .count()
        }
    }

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn publish(&self, session_id: Uuid, event: GameEvent) {
            self.events.lock().unwrap().push((session_id, event));
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            workers: 2,
            max_attempts: 5,
            job_deadline: Duration::from_secs(5),
            idempotency_window: Duration::from_secs(60),
            backoff: Backoff {
                base: Duration::from_millis(2),
                factor: 2,
                cap: Duration::from_millis(8),
            },
        }
    }

    fn ctx() -> QueryContext {
        QueryContext::new("pipeline-test")
    }

    async fn wait_terminal(pipeline: &JobPipeline, id: Uuid) -> AiJobRecord {
        for _ in 0..500 {
            let job = pipeline.status(&ctx(), id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn job_retries_twice_then_succeeds_with_one_artifact() {
        // Scenario: provider fails twice with upstream errors, then
        // succeeds — attempts = 3, status succeeded, exactly one
        // ai-artifact broadcast.
        let provider = Arc::new(ScriptedMockProvider::upstream_then_text(
            2,
            "the wyvern wheels away",
        ));
        let sink = RecordingSink::new();
        let pipeline = JobPipeline::new(
            AiJobRepo::new(Database::open_in_memory().unwrap()),
            provider.clone(),
            sink.clone(),
            fast_config(),
        );
        let handles = pipeline.start();

        let session = Uuid::new_v4();
        let id = pipeline
            .submit(
                &ctx(),
                JobKind::EncounterNarration,
                session,
                Uuid::new_v4(),
                serde_json::json!({"prompt": "the wyvern disengages"}),
            )
            .await
            .unwrap();

        let done = wait_terminal(&pipeline, id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.attempts, 3);
        assert_eq!(provider.calls(), 3);
        assert_eq!(sink.artifacts(), 1, "exactly one artifact broadcast");

        pipeline.shutdown();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn duplicate_submit_returns_existing_job() {
        let pipeline = JobPipeline::new(
            AiJobRepo::new(Database::open_in_memory().unwrap()),
            Arc::new(MockProvider),
            RecordingSink::new(),
            fast_config(),
        );
        // No workers: both submits land before anything runs.
        let session = Uuid::new_v4();
        let user = Uuid::new_v4();
        let payload = serde_json::json!({"prompt": "name the harbor"});

        let a = pipeline
            .submit(&ctx(), JobKind::Settlement, session, user, payload.clone())
            .await
            .unwrap();
        let b = pipeline
            .submit(&ctx(), JobKind::Settlement, session, user, payload)
            .await
            .unwrap();
        assert_eq!(a, b);

        let c = pipeline
            .submit(
                &ctx(),
                JobKind::Settlement,
                session,
                user,
                serde_json::json!({"prompt": "name the other harbor"}),
            )
            .await
            .unwrap();
        assert_ne!(a, c, "different payload is a different job");
    }

    #[tokio::test]
    async fn bad_request_fails_without_retry() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![Err(
            ProviderError::BadRequest("prompt too long".into()),
        )]));
        let sink = RecordingSink::new();
        let pipeline = JobPipeline::new(
            AiJobRepo::new(Database::open_in_memory().unwrap()),
            provider.clone(),
            sink.clone(),
            fast_config(),
        );
        let handles = pipeline.start();

        let id = pipeline
            .submit(
                &ctx(),
                JobKind::Culture,
                Uuid::new_v4(),
                Uuid::new_v4(),
                serde_json::json!({"prompt": "x"}),
            )
            .await
            .unwrap();

        let done = wait_terminal(&pipeline, id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempts, 1);
        assert_eq!(provider.calls(), 1);
        assert_eq!(sink.artifacts(), 0);

        pipeline.shutdown();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn exhausted_attempts_dead_letter() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![
            Err(ProviderError::Upstream("outage".into())),
            Err(ProviderError::Upstream("outage".into())),
        ]));
        let sink = RecordingSink::new();
        let mut config = fast_config();
        config.max_attempts = 2;
        let pipeline = JobPipeline::new(
            AiJobRepo::new(Database::open_in_memory().unwrap()),
            provider,
            sink.clone(),
            config,
        );
        let handles = pipeline.start();

        let id = pipeline
            .submit(
                &ctx(),
                JobKind::Faction,
                Uuid::new_v4(),
                Uuid::new_v4(),
                serde_json::json!({"prompt": "x"}),
            )
            .await
            .unwrap();

        let done = wait_terminal(&pipeline, id).await;
        assert_eq!(done.status, JobStatus::Dead);
        assert_eq!(done.attempts, 2);
        assert!(done.error.unwrap().contains("exhausted"));
        assert_eq!(sink.artifacts(), 0);

        pipeline.shutdown();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn queued_job_cancels_before_running() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![Ok("never sent".into())]));
        let pipeline = JobPipeline::new(
            AiJobRepo::new(Database::open_in_memory().unwrap()),
            provider.clone(),
            RecordingSink::new(),
            fast_config(),
        );
        // Workers not started: the job stays queued.
        let id = pipeline
            .submit(
                &ctx(),
                JobKind::CharacterBackstory,
                Uuid::new_v4(),
                Uuid::new_v4(),
                serde_json::json!({"prompt": "x"}),
            )
            .await
            .unwrap();

        let status = pipeline.cancel(&ctx(), id).await.unwrap();
        assert_eq!(status, JobStatus::Canceled);

        // Even if workers start later, the canceled job must not run.
        let handles = pipeline.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.calls(), 0);
        assert_eq!(
            pipeline.status(&ctx(), id).await.unwrap().status,
            JobStatus::Canceled
        );

        pipeline.shutdown();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test]
    async fn restart_recovery_picks_up_queued_jobs() {
        // Submit with no workers, then "restart" by starting the pool on a
        // pipeline whose in-memory queue never saw the job.
        let db = Database::open_in_memory().unwrap();
        let submit_side = JobPipeline::new(
            AiJobRepo::new(db.clone()),
            Arc::new(MockProvider),
            RecordingSink::new(),
            fast_config(),
        );
        let id = submit_side
            .submit(
                &ctx(),
                JobKind::WorldEvent,
                Uuid::new_v4(),
                Uuid::new_v4(),
                serde_json::json!({"prompt": "a comet"}),
            )
            .await
            .unwrap();

        let sink = RecordingSink::new();
        let restarted = JobPipeline::new(
            AiJobRepo::new(db),
            Arc::new(MockProvider),
            sink.clone(),
            fast_config(),
        );
        let handles = restarted.start();

        let done = wait_terminal(&restarted, id).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(sink.artifacts(), 1);

        restarted.shutdown();
        for h in handles {
            let _ = h.await;
        }
    }
}
