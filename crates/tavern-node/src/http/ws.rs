// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket transport — bridges a duplex client stream onto the session
//! hub.
//!
//! # Handshake
//!
//! The first server frame after the upgrade is `auth-required`; the client
//! answers with an `auth` message carrying its bearer access token and the
//! session id (tokens travel in-band, never in the URL). On success the
//! server sends `session-snapshot` and starts relaying; on failure the
//! socket closes with reason `auth-failed`.
//!
//! # Liveness
//!
//! Idle connections are pinged at the configured interval and closed after
//! the configured grace with no inbound traffic.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use serde_json::json;
use tavern_core::GameEvent;
use tavern_store::QueryContext;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::protocol::{close, ClientMessage, Envelope};
use crate::services::RollParams;

use super::AppState;

/// How long a fresh connection gets to present its token.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
/// Outbound buffer between the hub and this socket's writer.
const OUTBOUND_BUFFER: usize = 64;

/// HTTP handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

pub async fn handle_socket(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    let correlation = Uuid::new_v4().to_string();
    debug!(%peer, "WebSocket connected");

    // ── Handshake ─────────────────────────────────────────────────────────────
    send(
        &mut socket,
        &Envelope::control("auth-required", &correlation, json!({})),
    )
    .await;

    let auth = match tokio::time::timeout(AUTH_TIMEOUT, read_client_message(&mut socket)).await {
        Ok(Some(ClientMessage::Auth {
            token,
            session_id,
            last_seq,
        })) => Some((token, session_id, last_seq)),
        Ok(_) | Err(_) => None,
    };
    let Some((token, session_id, last_seq)) = auth else {
        close_with(&mut socket, close::AUTH_FAILED).await;
        return;
    };

    let claims = match state.signer.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            send(
                &mut socket,
                &Envelope::error(&correlation, e.code(), "authentication failed"),
            )
            .await;
            close_with(&mut socket, close::AUTH_FAILED).await;
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTBOUND_BUFFER);
    let (close_tx, mut close_rx) = oneshot::channel::<&'static str>();
    let registered = match state
        .hub
        .register(
            session_id,
            claims.sub,
            claims.username.clone(),
            out_tx,
            close_tx,
            last_seq,
            correlation.clone(),
        )
        .await
    {
        Ok(registered) => registered,
        Err(e) => {
            send(
                &mut socket,
                &Envelope::error(&correlation, e.code(), &e.to_string()),
            )
            .await;
            close_with(&mut socket, close::AUTH_FAILED).await;
            return;
        }
    };
    let conn_id = registered.conn_id;
    info!(%peer, %session_id, user = %claims.sub, conn = conn_id, "stream authenticated");

    let mut snapshot_frame = Envelope::control(
        "session-snapshot",
        &correlation,
        serde_json::to_value(&registered.snapshot).unwrap_or_default(),
    );
    snapshot_frame.session_id = Some(session_id);
    send(&mut socket, &snapshot_frame).await;
    if last_seq.is_some() && !registered.resumed {
        send(
            &mut socket,
            &Envelope::error(&correlation, "snapshot-required", "resume window expired"),
        )
        .await;
    }

    // ── Relay loop ────────────────────────────────────────────────────────────
    let ping_interval = state.config.server.ws_ping_interval;
    let idle_grace = state.config.server.ws_idle_grace;
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_inbound = Instant::now();

    let close_reason = loop {
        tokio::select! {
            // Hub → client.
            outbound = out_rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        if !send(&mut socket, &envelope).await {
                            break None;
                        }
                    }
                    // The hub dropped us (kick, slow consumer, session
                    // end); the close channel carries the reason.
                    None => break (&mut close_rx).await.ok(),
                }
            }
            // Hub-initiated close beats the buffer drain.
            reason = &mut close_rx => {
                break reason.ok();
            }
            // Client → hub.
            inbound = socket.recv() => {
                last_inbound = Instant::now();
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                dispatch(&state, &mut socket, &correlation, session_id, conn_id, &claims, msg)
                                    .await;
                            }
                            Err(e) => {
                                warn!(%peer, "invalid client message: {e}");
                                send(
                                    &mut socket,
                                    &Envelope::error(&correlation, "bad-message", &format!("invalid message: {e}")),
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(%peer, "WebSocket recv error: {e}");
                        break None;
                    }
                }
            }
            // Liveness.
            _ = ping.tick() => {
                if last_inbound.elapsed() > ping_interval + idle_grace {
                    break Some(close::IDLE);
                }
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break None;
                }
            }
        }
    };

    state.hub.unregister(conn_id).await;
    if let Some(reason) = close_reason {
        close_with(&mut socket, reason).await;
    }
    info!(%peer, conn = conn_id, "WebSocket disconnected");
}

/// Route one parsed client message.
async fn dispatch(
    state: &AppState,
    socket: &mut WebSocket,
    correlation: &str,
    session_id: Uuid,
    conn_id: u64,
    claims: &crate::auth::AccessClaims,
    msg: ClientMessage,
) {
    let result = match msg {
        ClientMessage::Auth { .. } => Err(tavern_core::error::GameError::validation(
            tavern_core::error::codes::BAD_REQUEST,
            "already authenticated",
        )),
        ClientMessage::Chat { text } => state
            .hub
            .publish(
                session_id,
                GameEvent::Chat {
                    user_id: claims.sub,
                    character_name: None,
                    text,
                },
                correlation.to_string(),
            )
            .await
            .map(|_| ()),
        ClientMessage::RollDice {
            notation,
            purpose,
            character_id,
        } => {
            let ctx = QueryContext::new(correlation.to_string())
                .with_user(claims.sub)
                .with_deadline_in(Duration::from_secs(10));
            match state
                .dice
                .roll(
                    &ctx,
                    RollParams {
                        user_id: claims.sub,
                        session_id: Some(session_id),
                        character_id,
                        notation,
                        modifier: 0,
                        purpose,
                    },
                )
                .await
            {
                // Logged rolls arrive through the broadcast; an unlogged
                // roll goes back to the roller alone.
                Ok(roll) if roll.unlogged => {
                    send(
                        socket,
                        &Envelope::control(
                            "dice-roll",
                            correlation,
                            serde_json::to_value(&roll).unwrap_or_default(),
                        ),
                    )
                    .await;
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            }
        }
        ClientMessage::CombatAction { action } => state
            .hub
            .combat(session_id, claims.sub, action, correlation.to_string())
            .await,
        ClientMessage::Resume { last_seq } => match state.hub.resume(conn_id, last_seq).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                send(
                    socket,
                    &Envelope::error(correlation, "snapshot-required", "resume window expired"),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        send(
            socket,
            &Envelope::error(correlation, e.code(), &e.to_string()),
        )
        .await;
    }
}

async fn read_client_message(socket: &mut WebSocket) -> Option<ClientMessage> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Send an envelope; returns `false` when the socket is gone.
async fn send(socket: &mut WebSocket, envelope: &Envelope) -> bool {
    match serde_json::to_string(envelope) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    }
}

async fn close_with(socket: &mut WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: axum::extract::ws::close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
