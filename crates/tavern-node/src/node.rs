// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Node startup — assembles all subsystems and serves.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order:
//!
//! 1. Validate the configuration (production mode refuses weak secrets,
//!    plaintext DB transport and the mock AI provider).
//! 2. Open the embedded store and initialize the schema; build the
//!    process-local response cache and the repositories.
//! 3. Construct the [`SessionHub`] actor and spawn its loop.
//! 4. Construct the AI provider from config and start the job pipeline
//!    (scheduler + worker pool) with the hub as its artifact sink.
//! 5. Spawn the store health-probe loop feeding `/health/ready`.
//! 6. Wire services and the HTTP router, then serve until ctrl-c.
//!
//! There is no global registry anywhere: everything the handlers use is
//! owned by [`crate::http::AppState`] and wired exactly once, here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tavern_config::Config;
use tavern_core::GameEvent;
use tavern_jobs::{ArtifactSink, JobPipeline, PipelineConfig};
use tavern_store::{
    AiJobRepo, CharacterRepo, Database, DiceRollRepo, PoolSettings, RefreshTokenRepo,
    ResponseCache, SessionRepo, UserRepo,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{RefreshService, TokenSigner};
use crate::http::middleware::RateLimiters;
use crate::http::{router, AppState};
use crate::hub::{HubHandle, SessionHub};
use crate::services::{DiceService, SessionService};

/// Default TTL for memoized reads.
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Finished AI artifacts go to the originating session through the hub.
struct HubSink(HubHandle);

#[async_trait]
impl ArtifactSink for HubSink {
    async fn publish(&self, session_id: Uuid, event: GameEvent) {
        let correlation = format!("ai-artifact-{}", Uuid::new_v4());
        if let Err(e) = self.0.publish(session_id, event, correlation).await {
            warn!(%session_id, "publishing AI artifact failed: {e}");
        }
    }
}

/// Start the node. Blocks until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("configuration rejected")?;
    let config = Arc::new(config);

    // ── Store ─────────────────────────────────────────────────────────────────
    let pool = PoolSettings {
        max_open: config.database.max_open_conns,
        max_idle: config.database.max_idle_conns,
        max_lifetime: config.database.max_lifetime,
        ..PoolSettings::default()
    };
    let db_path = PathBuf::from(format!("{}.sqlite3", config.database.name));
    let db = Database::open(&db_path, &pool).context("opening store")?;
    info!(path = %db_path.display(), "store opened");

    let cache = Arc::new(ResponseCache::new(CACHE_TTL));
    let users = Arc::new(UserRepo::new(db.clone()));
    let characters = Arc::new(CharacterRepo::new(db.clone(), cache.clone()));
    let sessions_repo = Arc::new(SessionRepo::new(db.clone(), cache.clone()));

    // ── Session hub ───────────────────────────────────────────────────────────
    let (hub, hub_handle) = SessionHub::new(sessions_repo.clone(), characters.clone());
    tokio::spawn(hub.run());

    // ── AI pipeline ───────────────────────────────────────────────────────────
    let provider = tavern_model::from_config(&config.ai, config.env)
        .context("constructing AI provider")?;
    info!(provider = provider.name(), model = provider.model_name(), "AI provider ready");
    let pipeline = JobPipeline::new(
        AiJobRepo::new(db.clone()),
        provider,
        Arc::new(HubSink(hub_handle.clone())),
        PipelineConfig::default(),
    );
    let _pipeline_tasks = pipeline.start();

    // ── Health probes ─────────────────────────────────────────────────────────
    tokio::spawn({
        let db = db.clone();
        let interval = pool.probe_interval;
        async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if !db.probe().await {
                    warn!("store health probe failed; pool marked degraded");
                }
            }
        }
    });

    // ── Services and router ───────────────────────────────────────────────────
    let signer = TokenSigner::new(&config.auth.jwt_secret, config.auth.access_token_duration);
    let refresh = Arc::new(RefreshService::new(
        RefreshTokenRepo::new(db.clone()),
        signer.clone(),
        config.auth.access_token_duration,
        config.auth.refresh_token_duration,
    ));
    let session_service = Arc::new(SessionService::new(
        sessions_repo,
        characters.clone(),
        users.clone(),
        hub_handle.clone(),
    ));
    let dice = Arc::new(DiceService::new(
        DiceRollRepo::new(db.clone()),
        hub_handle.clone(),
    ));
    let limiters = RateLimiters::new(
        config.rate_limit.auth_per_minute,
        config.rate_limit.api_per_minute,
    );

    let state = AppState {
        config: config.clone(),
        hub: hub_handle,
        signer,
        refresh,
        users,
        characters,
        sessions: session_service,
        dice,
        pipeline: pipeline.clone(),
        db,
        limiters,
        started_at: std::time::Instant::now(),
    };
    let app = router(state);

    // ── Serve ─────────────────────────────────────────────────────────────────
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, env = ?config.env, "tavern node listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    pipeline.shutdown();
    Ok(())
}
