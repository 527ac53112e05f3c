// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The HTTP surface: REST handlers, the WebSocket upgrade, and the
//! middleware stack (correlation ids, rate limits, CSRF cookie, CORS).

pub mod ai;
pub mod auth;
pub mod characters;
pub mod dice;
pub mod health;
pub mod middleware;
pub mod sessions;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tavern_config::Config;
use tavern_jobs::JobPipeline;
use tavern_store::{CharacterRepo, Database, UserRepo};
use tower_http::cors::CorsLayer;

use crate::auth::{RefreshService, TokenSigner};
use crate::hub::HubHandle;
use crate::services::{DiceService, SessionService};

use middleware::RateLimiters;

/// Budget for the store work a single REST request may do. On elapse the
/// remaining queries fail fast and the partial transaction rolls back.
const REQUEST_DEADLINE: std::time::Duration = std::time::Duration::from_secs(30);

/// Per-request store context: correlation id, acting user, deadline.
pub(crate) fn request_ctx(correlation: &str, user_id: uuid::Uuid) -> tavern_store::QueryContext {
    tavern_store::QueryContext::new(correlation)
        .with_user(user_id)
        .with_deadline_in(REQUEST_DEADLINE)
}

/// Context for unauthenticated endpoints (register/login/refresh).
pub(crate) fn anon_ctx(correlation: &str) -> tavern_store::QueryContext {
    tavern_store::QueryContext::new(correlation).with_deadline_in(REQUEST_DEADLINE)
}

/// Everything the handlers need, wired once in the composition root.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: HubHandle,
    pub signer: TokenSigner,
    pub refresh: Arc<RefreshService>,
    pub users: Arc<UserRepo>,
    pub characters: Arc<CharacterRepo>,
    pub sessions: Arc<SessionService>,
    pub dice: Arc<DiceService>,
    pub pipeline: Arc<JobPipeline>,
    pub db: Arc<Database>,
    pub limiters: Arc<RateLimiters>,
    pub started_at: std::time::Instant,
}

pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_auth,
        ));

    let api_routes = Router::new()
        .route(
            "/characters",
            get(characters::list).post(characters::create),
        )
        .route(
            "/characters/:id",
            get(characters::fetch)
                .put(characters::update)
                .delete(characters::remove),
        )
        .route("/sessions", get(sessions::list).post(sessions::create))
        .route("/sessions/:id", get(sessions::fetch))
        .route("/sessions/:id/join", post(sessions::join))
        .route("/sessions/:id/leave", post(sessions::leave))
        .route("/sessions/:id/kick", post(sessions::kick))
        .route("/sessions/:id/pause", post(sessions::pause))
        .route("/sessions/:id/resume", post(sessions::resume))
        .route("/sessions/:id/end", post(sessions::end))
        .route("/sessions/:id/rolls", get(dice::history))
        .route("/dice/roll", post(dice::roll))
        .route("/ai/generate", post(ai::generate))
        .route("/ai/jobs/:id", get(ai::job_status).delete(ai::cancel))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_api));

    Router::new()
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1", api_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/details", get(health::details))
        .route("/ws", get(ws::ws_handler))
        .layer(from_fn_with_state(state.clone(), middleware::csrf_guard))
        .layer(from_fn_with_state(state.clone(), middleware::csrf_cookie))
        .layer(from_fn(middleware::correlation_header))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    use tower_http::cors::AllowOrigin;

    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let layer = if origins.is_empty() {
        CorsLayer::new()
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };
    // Explicit lists throughout: wildcards cannot be combined with
    // `Access-Control-Allow-Credentials: true`.
    layer
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(config.cors.allow_credentials)
}
