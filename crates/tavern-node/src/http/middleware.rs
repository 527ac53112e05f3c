// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Cross-cutting HTTP concerns: correlation ids, bearer auth, per-IP rate
//! limiting and the CSRF token cookie.
//!
//! # Rate limiting
//!
//! Two `governor` keyed GCRA limiters: a tight one on `/api/v1/auth/*`
//! (credential stuffing) and a looser one on the rest of the API surface.
//! Loopback addresses are exempt — a local process already has local
//! access to the machine.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use rand::RngCore;
use tavern_core::error::{codes, GameError};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

use super::AppState;

// ── Correlation ids ───────────────────────────────────────────────────────────

/// The request's correlation id. Read from `x-request-id` when the edge
/// stamped one, minted otherwise; echoed back on the response and threaded
/// through every log line and query this request produces.
#[derive(Debug, Clone)]
pub struct Correlation(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Correlation {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(correlation_from(&parts.headers)))
    }
}

pub fn correlation_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .or_else(|| headers.get("x-correlation-id"))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Echo the correlation id back so clients and the edge can stitch logs.
pub async fn correlation_header(req: Request, next: Next) -> Response {
    let id = correlation_from(req.headers());
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

// ── Authentication ────────────────────────────────────────────────────────────

/// The authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let correlation = correlation_from(&parts.headers);
        let token = extract_bearer(&parts.headers).ok_or_else(|| {
            ApiError::new(
                GameError::authentication(codes::TOKEN_INVALID),
                correlation.clone(),
            )
        })?;
        let claims = state
            .signer
            .verify(token)
            .map_err(|e| ApiError::new(e, correlation))?;
        Ok(AuthUser {
            user_id: claims.sub,
            username: claims.username,
        })
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

pub struct RateLimiters {
    auth: IpLimiter,
    api: IpLimiter,
}

impl RateLimiters {
    pub fn new(auth_per_minute: u32, api_per_minute: u32) -> Arc<Self> {
        Arc::new(Self {
            auth: RateLimiter::keyed(per_minute(auth_per_minute)),
            api: RateLimiter::keyed(per_minute(api_per_minute)),
        })
    }
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n.max(1)).expect("clamped to >= 1"))
}

pub async fn rate_limit_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    limit(&state.limiters.auth, addr, req, next).await
}

pub async fn rate_limit_api(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    limit(&state.limiters.api, addr, req, next).await
}

async fn limit(limiter: &IpLimiter, addr: SocketAddr, req: Request, next: Next) -> Response {
    let ip = client_ip(req.headers(), addr);
    if !is_loopback(ip) && limiter.check_key(&ip).is_err() {
        warn!(%ip, path = %req.uri().path(), "rate limit exceeded");
        let correlation = correlation_from(req.headers());
        return ApiError::new(
            GameError::RateLimit {
                retry_after: std::time::Duration::from_secs(60),
            },
            correlation,
        )
        .into_response();
    }
    next.run(req).await
}

/// Prefer the edge's `X-Forwarded-For` (first hop), fall back to the
/// socket peer.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| addr.ip())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

// ── CSRF cookie ───────────────────────────────────────────────────────────────

const CSRF_COOKIE: &str = "csrf_token";

/// Ensure every client holds a CSRF token cookie: path `/`, SameSite
/// strict, readable by scripts (HttpOnly false), 24 h, `Secure` in
/// production. Auth tokens never travel in cookies — only this token does.
pub async fn csrf_cookie(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let has_cookie = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|cookies| cookies.contains(CSRF_COOKIE));
    // Browsers enforce same-origin on WebSocket upgrades; skip those.
    let is_upgrade = req.headers().contains_key(header::UPGRADE);

    let mut resp = next.run(req).await;
    if !has_cookie && !is_upgrade {
        let secure = if state.config.env == tavern_config::Environment::Production {
            "; Secure"
        } else {
            ""
        };
        let cookie = format!(
            "{CSRF_COOKIE}={}; Path=/; SameSite=Strict; Max-Age=86400{secure}",
            csrf_token()
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            resp.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    resp
}

fn csrf_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reject cross-site mutating requests whose `Origin` disagrees with the
/// allowed set. GET/HEAD/OPTIONS and upgrades pass through.
pub async fn csrf_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mutating = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if mutating && !state.config.cors.allowed_origins.is_empty() {
        if let Some(origin) = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        {
            if !state.config.cors.allowed_origins.iter().any(|o| o == origin) {
                let correlation = correlation_from(req.headers());
                return ApiError::new(
                    GameError::authorization(codes::NOT_AUTHORIZED),
                    correlation,
                )
                .into_response();
            }
        }
    }
    next.run(req).await
}

// ── Unit tests ────────────────────────────────────────────────────────────────
