// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `SessionHub` — the authoritative broadcast point for every session.
//!
//! # Design
//!
//! ```text
//!   WS handler ──┐
//!                ├──► mpsc::Sender<HubCommand> ──► SessionHub (actor)
//!   REST svc  ───┤                                     │ owns rooms:
//!   AI workers ──┘                                     │ seq, connections,
//!                                                      │ history, combat
//!   WS handler ◄── per-connection mpsc<Envelope> ◄─────┘
//! ```
//!
//! One task owns every room, so all mutations of a session's membership,
//! combat and sequence counter are serialized through the command queue —
//! for any two commands on the same session, one fully completes before
//! the other begins. Sequence numbers are assigned in the same domain as
//! the mutation that produced the event, which is what makes the
//! per-session total order hold for every receiver.
//!
//! Backpressure: each connection has a bounded outbound buffer. A
//! connection whose buffer would overflow is closed with `slow-consumer`
//! and dropped on the spot — the hub never blocks on one slow client.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tavern_core::error::{codes, GameError};
use tavern_core::{
    Combat, Combatant, GameEvent, GameSession, SessionStatus, StateBag,
};
use tavern_core::dice::Roller;
use tavern_store::{CharacterRepo, QueryContext, SessionRepo};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{close, CombatAction, CombatView, Envelope, SessionSnapshot};

/// Events kept per room for `resume`.
const RESUME_BUFFER: usize = 512;

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cheap-to-clone handle to the running hub. Transports and services hold
/// one of these; the actor owns all state.
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
}

/// What a successful register returns.
#[derive(Debug)]
pub struct Registered {
    pub conn_id: u64,
    pub snapshot: SessionSnapshot,
    /// Whether a requested resume was honored. `false` with a `last_seq`
    /// request means the buffer no longer reaches back that far and the
    /// client must rebuild from the snapshot.
    pub resumed: bool,
}

impl HubHandle {
    /// Attach an authenticated stream to a session.
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        username: String,
        outbound: mpsc::Sender<Envelope>,
        close_tx: oneshot::Sender<&'static str>,
        last_seq: Option<u64>,
        correlation_id: String,
    ) -> Result<Registered, GameError> {
        self.call(|reply| HubCommand::Register {
            session_id,
            user_id,
            username,
            outbound,
            close_tx,
            last_seq,
            correlation_id,
            reply,
        })
        .await
    }

    /// Detach a stream. Idempotent.
    pub async fn unregister(&self, conn_id: u64) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { conn_id }).await;
    }

    /// Broadcast an event to every connected participant, in total order.
    /// Returns the assigned sequence number.
    pub async fn publish(
        &self,
        session_id: Uuid,
        event: GameEvent,
        correlation_id: String,
    ) -> Result<u64, GameError> {
        self.call(|reply| HubCommand::Publish {
            session_id,
            event,
            correlation_id,
            reply,
        })
        .await
    }

    /// Deliver an event to a single participant, ordered relative to the
    /// broadcasts around it.
    pub async fn direct(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        event: GameEvent,
        correlation_id: String,
    ) -> Result<(), GameError> {
        self.call(|reply| HubCommand::Direct {
            session_id,
            user_id,
            event,
            correlation_id,
            reply,
        })
        .await
    }

    /// Disconnect a participant's streams (director only). Membership
    /// removal happens in the session service; this handles presence.
    pub async fn kick(
        &self,
        session_id: Uuid,
        director: Uuid,
        target: Uuid,
        correlation_id: String,
    ) -> Result<(), GameError> {
        self.call(|reply| HubCommand::Kick {
            session_id,
            director,
            target,
            correlation_id,
            reply,
        })
        .await
    }

    /// Run a combat command inside the session's serialization domain.
    pub async fn combat(
        &self,
        session_id: Uuid,
        actor: Uuid,
        action: CombatAction,
        correlation_id: String,
    ) -> Result<(), GameError> {
        self.call(|reply| HubCommand::Combat {
            session_id,
            actor,
            action,
            correlation_id,
            reply,
        })
        .await
    }

    /// Replay events after `last_seq` to an already-attached connection.
    /// Returns `false` when the buffer no longer reaches back that far
    /// (the client needs a fresh snapshot).
    pub async fn resume(&self, conn_id: u64, last_seq: u64) -> Result<bool, GameError> {
        self.call(|reply| HubCommand::Resume {
            conn_id,
            last_seq,
            reply,
        })
        .await
    }

    /// Drop a session's room after it ended (called by the session
    /// service once the `session-ended` event is out).
    pub async fn close_session(&self, session_id: Uuid) {
        let _ = self
            .cmd_tx
            .send(HubCommand::CloseSession { session_id })
            .await;
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, GameError>>) -> HubCommand,
    ) -> Result<T, GameError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| GameError::internal("session hub has shut down"))?;
        rx.await
            .map_err(|_| GameError::internal("session hub dropped a reply"))?
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

enum HubCommand {
    Register {
        session_id: Uuid,
        user_id: Uuid,
        username: String,
        outbound: mpsc::Sender<Envelope>,
        close_tx: oneshot::Sender<&'static str>,
        last_seq: Option<u64>,
        correlation_id: String,
        reply: oneshot::Sender<Result<Registered, GameError>>,
    },
    Unregister {
        conn_id: u64,
    },
    Publish {
        session_id: Uuid,
        event: GameEvent,
        correlation_id: String,
        reply: oneshot::Sender<Result<u64, GameError>>,
    },
    Direct {
        session_id: Uuid,
        user_id: Uuid,
        event: GameEvent,
        correlation_id: String,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Kick {
        session_id: Uuid,
        director: Uuid,
        target: Uuid,
        correlation_id: String,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Combat {
        session_id: Uuid,
        actor: Uuid,
        action: CombatAction,
        correlation_id: String,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Resume {
        conn_id: u64,
        last_seq: u64,
        reply: oneshot::Sender<Result<bool, GameError>>,
    },
    CloseSession {
        session_id: Uuid,
    },
}

// ── Room state ────────────────────────────────────────────────────────────────

struct Connection {
    user_id: Uuid,
    username: String,
    outbound: mpsc::Sender<Envelope>,
    close_tx: Option<oneshot::Sender<&'static str>>,
}

struct Room {
    session: GameSession,
    seq: u64,
    connections: HashMap<u64, Connection>,
    history: VecDeque<Envelope>,
    combat: Option<Combat>,
    /// Combatant id → owning user, for turn authorization.
    combat_owners: HashMap<Uuid, Uuid>,
}

impl Room {
    fn new(session: GameSession) -> Self {
        Self {
            session,
            seq: 0,
            connections: HashMap::new(),
            history: VecDeque::new(),
            combat: None,
            combat_owners: HashMap::new(),
        }
    }

    fn combat_view(&self) -> Option<CombatView> {
        self.combat.as_ref().map(|c| CombatView {
            combat_id: c.id,
            round: c.round,
            current_turn: c.current_turn,
            order: c.order.clone(),
            combatants: c.combatants().cloned().collect(),
        })
    }

    fn online_connections(&self, user_id: Uuid) -> usize {
        self.connections
            .values()
            .filter(|c| c.user_id == user_id)
            .count()
    }
}

// ── The actor ─────────────────────────────────────────────────────────────────

pub struct SessionHub {
    cmd_rx: mpsc::Receiver<HubCommand>,
    rooms: HashMap<Uuid, Room>,
    conn_rooms: HashMap<u64, Uuid>,
    next_conn_id: u64,
    sessions: Arc<SessionRepo>,
    characters: Arc<CharacterRepo>,
}

impl SessionHub {
    pub fn new(sessions: Arc<SessionRepo>, characters: Arc<CharacterRepo>) -> (Self, HubHandle) {
        // Deep enough to absorb bursts of dice rolls and AI artifacts
        // without stalling callers.
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let hub = Self {
            cmd_rx,
            rooms: HashMap::new(),
            conn_rooms: HashMap::new(),
            next_conn_id: 1,
            sessions,
            characters,
        };
        (hub, HubHandle { cmd_tx })
    }

    /// Run the actor loop. Ends when every handle is dropped.
    pub async fn run(mut self) {
        info!("session hub started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle(cmd).await;
        }
        info!("session hub stopped");
    }

    async fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register {
                session_id,
                user_id,
                username,
                outbound,
                close_tx,
                last_seq,
                correlation_id,
                reply,
            } => {
                let result = self
                    .register(
                        session_id,
                        user_id,
                        username,
                        outbound,
                        close_tx,
                        last_seq,
                        &correlation_id,
                    )
                    .await;
                let _ = reply.send(result);
            }
            HubCommand::Unregister { conn_id } => self.unregister(conn_id).await,
            HubCommand::Publish {
                session_id,
                event,
                correlation_id,
                reply,
            } => {
                let result = self.publish(session_id, event, &correlation_id).await;
                let _ = reply.send(result);
            }
            HubCommand::Direct {
                session_id,
                user_id,
                event,
                correlation_id,
                reply,
            } => {
                let _ = reply.send(self.direct(session_id, user_id, event, &correlation_id));
            }
            HubCommand::Kick {
                session_id,
                director,
                target,
                correlation_id,
                reply,
            } => {
                let result = self.kick(session_id, director, target, &correlation_id).await;
                let _ = reply.send(result);
            }
            HubCommand::Combat {
                session_id,
                actor,
                action,
                correlation_id,
                reply,
            } => {
                let result = self
                    .handle_combat(session_id, actor, action, &correlation_id)
                    .await;
                let _ = reply.send(result);
            }
            HubCommand::Resume {
                conn_id,
                last_seq,
                reply,
            } => {
                let _ = reply.send(self.resume_conn(conn_id, last_seq));
            }
            HubCommand::CloseSession { session_id } => {
                if let Some(room) = self.rooms.remove(&session_id) {
                    for (conn_id, mut conn) in room.connections {
                        if let Some(close) = conn.close_tx.take() {
                            let _ = close.send(close::SESSION_ENDED);
                        }
                        self.conn_rooms.remove(&conn_id);
                    }
                }
            }
        }
    }

    // ── Rooms ─────────────────────────────────────────────────────────────────

    async fn ensure_room(&mut self, session_id: Uuid) -> Result<&mut Room, GameError> {
        if !self.rooms.contains_key(&session_id) {
            let ctx = QueryContext::internal("hub");
            let session = self
                .sessions
                .by_id(&ctx, session_id)
                .await
                .map_err(GameError::from)?
                .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
            if session.status == SessionStatus::Ended {
                return Err(GameError::not_found(codes::SESSION_NOT_FOUND, "session"));
            }
            self.rooms.insert(session_id, Room::new(session));
        }
        Ok(self.rooms.get_mut(&session_id).expect("room just ensured"))
    }

    async fn register(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
        username: String,
        outbound: mpsc::Sender<Envelope>,
        close_tx: oneshot::Sender<&'static str>,
        last_seq: Option<u64>,
        correlation_id: &str,
    ) -> Result<Registered, GameError> {
        let ctx = QueryContext::internal("hub-register").with_user(user_id);
        self.ensure_room(session_id).await?;

        let room = self.rooms.get_mut(&session_id).expect("room exists");
        let participants = self
            .sessions
            .participants(&ctx, session_id)
            .await
            .map_err(GameError::from)?;
        let is_member = room.session.is_director(user_id)
            || participants.iter().any(|p| p.user_id == user_id);
        if !is_member {
            return Err(GameError::authorization(codes::NOT_A_PARTICIPANT));
        }

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let snapshot = SessionSnapshot {
            session: room.session.clone(),
            participants,
            combat: room.combat_view(),
            seq: room.seq,
        };

        // Resume: replay everything after last_seq if the buffer still
        // reaches back that far.
        let resumed = match last_seq {
            Some(last) => {
                let oldest = room.history.front().and_then(|e| e.seq).unwrap_or(1);
                if last + 1 >= oldest || room.history.is_empty() {
                    for envelope in room.history.iter() {
                        if envelope.seq.unwrap_or(0) > last {
                            let _ = outbound.try_send(envelope.clone());
                        }
                    }
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        room.connections.insert(
            conn_id,
            Connection {
                user_id,
                username: username.clone(),
                outbound,
                close_tx: Some(close_tx),
            },
        );
        self.conn_rooms.insert(conn_id, session_id);

        // First connection of this user: presence announcement.
        let room = self.rooms.get_mut(&session_id).expect("room exists");
        if room.online_connections(user_id) == 1 {
            let _ = self
                .sessions
                .set_online(&ctx, session_id, user_id, true)
                .await;
            self.broadcast(
                session_id,
                GameEvent::ParticipantJoined { user_id, username },
                correlation_id,
            )
            .await?;
        }
        debug!(%session_id, %user_id, conn = conn_id, "stream registered");

        Ok(Registered {
            conn_id,
            snapshot,
            resumed,
        })
    }

    async fn unregister(&mut self, conn_id: u64) {
        let Some(session_id) = self.conn_rooms.remove(&conn_id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&session_id) else {
            return;
        };
        let Some(conn) = room.connections.remove(&conn_id) else {
            return;
        };
        if room.online_connections(conn.user_id) == 0 {
            let ctx = QueryContext::internal("hub-unregister");
            let _ = self
                .sessions
                .set_online(&ctx, session_id, conn.user_id, false)
                .await;
            let _ = self
                .broadcast(
                    session_id,
                    GameEvent::ParticipantLeft {
                        user_id: conn.user_id,
                        username: conn.username,
                    },
                    "hub-unregister",
                )
                .await;
        }
        debug!(%session_id, conn = conn_id, "stream unregistered");
    }

    fn resume_conn(&mut self, conn_id: u64, last_seq: u64) -> Result<bool, GameError> {
        let session_id = *self
            .conn_rooms
            .get(&conn_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "connection"))?;
        let room = self
            .rooms
            .get(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
        let oldest = room.history.front().and_then(|e| e.seq).unwrap_or(1);
        if last_seq + 1 < oldest && !room.history.is_empty() {
            return Ok(false);
        }
        if let Some(conn) = room.connections.get(&conn_id) {
            for envelope in room.history.iter() {
                if envelope.seq.unwrap_or(0) > last_seq {
                    let _ = conn.outbound.try_send(envelope.clone());
                }
            }
        }
        Ok(true)
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    async fn publish(
        &mut self,
        session_id: Uuid,
        event: GameEvent,
        correlation_id: &str,
    ) -> Result<u64, GameError> {
        self.ensure_room(session_id).await?;
        self.mark_active(session_id).await;
        self.broadcast(session_id, event, correlation_id).await
    }

    /// First broadcast flips a pending session active.
    async fn mark_active(&mut self, session_id: Uuid) {
        let Some(room) = self.rooms.get_mut(&session_id) else {
            return;
        };
        if room.session.status == SessionStatus::Pending {
            room.session.mark_active();
            let ctx = QueryContext::internal("hub-activate");
            if let Err(e) = self.sessions.update(&ctx, &room.session).await {
                warn!(%session_id, "activating session failed: {e}");
            }
        }
    }

    async fn broadcast(
        &mut self,
        session_id: Uuid,
        event: GameEvent,
        correlation_id: &str,
    ) -> Result<u64, GameError> {
        let room = self
            .rooms
            .get_mut(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;

        // Keep the cached session status in step with lifecycle events so
        // later snapshots do not show a stale state.
        match &event {
            GameEvent::SessionPaused => room.session.status = SessionStatus::Paused,
            GameEvent::SessionResumed => room.session.status = SessionStatus::Active,
            GameEvent::SessionEnded => room.session.status = SessionStatus::Ended,
            _ => {}
        }

        room.seq += 1;
        let seq = room.seq;
        let envelope = Envelope::event(session_id, seq, correlation_id, &event);

        room.history.push_back(envelope.clone());
        while room.history.len() > RESUME_BUFFER {
            room.history.pop_front();
        }

        let mut slow = Vec::new();
        for (&conn_id, conn) in &mut room.connections {
            match conn.outbound.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%session_id, conn = conn_id, "slow consumer dropped");
                    if let Some(close) = conn.close_tx.take() {
                        let _ = close.send(close::SLOW_CONSUMER);
                    }
                    slow.push(conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slow.push(conn_id);
                }
            }
        }
        for conn_id in slow {
            room.connections.remove(&conn_id);
            self.conn_rooms.remove(&conn_id);
        }
        Ok(seq)
    }

    fn direct(
        &mut self,
        session_id: Uuid,
        user_id: Uuid,
        event: GameEvent,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        let room = self
            .rooms
            .get_mut(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
        // Direct notices share the session sequence so their order relative
        // to surrounding broadcasts is preserved for the recipient.
        room.seq += 1;
        let envelope = Envelope::event(session_id, room.seq, correlation_id, &event);
        for conn in room.connections.values_mut() {
            if conn.user_id == user_id {
                let _ = conn.outbound.try_send(envelope.clone());
            }
        }
        Ok(())
    }

    async fn kick(
        &mut self,
        session_id: Uuid,
        director: Uuid,
        target: Uuid,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        self.ensure_room(session_id).await?;
        let room = self.rooms.get_mut(&session_id).expect("room just ensured");
        if !room.session.is_director(director) {
            return Err(GameError::authorization(codes::DIRECTOR_ONLY));
        }
        let mut username = None;
        let doomed: Vec<u64> = room
            .connections
            .iter()
            .filter(|(_, c)| c.user_id == target)
            .map(|(&id, _)| id)
            .collect();
        for conn_id in &doomed {
            if let Some(mut conn) = room.connections.remove(conn_id) {
                username = Some(conn.username.clone());
                if let Some(close) = conn.close_tx.take() {
                    let _ = close.send(close::KICKED);
                }
            }
        }
        for conn_id in doomed {
            self.conn_rooms.remove(&conn_id);
        }
        self.broadcast(
            session_id,
            GameEvent::ParticipantLeft {
                user_id: target,
                username: username.unwrap_or_default(),
            },
            correlation_id,
        )
        .await?;
        Ok(())
    }

    // ── Combat ────────────────────────────────────────────────────────────────

    async fn handle_combat(
        &mut self,
        session_id: Uuid,
        actor: Uuid,
        action: CombatAction,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        self.ensure_room(session_id).await?;

        match action {
            CombatAction::Start {
                character_ids,
                npcs,
            } => {
                self.start_combat(session_id, actor, character_ids, npcs, correlation_id)
                    .await
            }
            CombatAction::End => {
                self.authorize_director(session_id, actor)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                combat.end()?;
                let combat_id = combat.id;
                self.finish_combat(session_id, combat_id, correlation_id)
                    .await
            }
            CombatAction::NextTurn => {
                self.authorize_current_actor(session_id, actor)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                let advance = combat.next_turn()?;
                let combat_id = combat.id;
                self.broadcast(
                    session_id,
                    GameEvent::CombatUpdated {
                        combat_id,
                        turn: Some(advance),
                        damage: None,
                    },
                    correlation_id,
                )
                .await?;
                Ok(())
            }
            CombatAction::DealDamage {
                target_id,
                amount,
                damage_type,
            } => {
                self.authorize_current_actor(session_id, actor)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                let mut roller = Roller::from_seed(clock_seed());
                let report = combat.deal_damage(target_id, amount, damage_type, &mut roller)?;
                let combat_id = combat.id;
                let ended = report.combat_ended;
                self.broadcast(
                    session_id,
                    GameEvent::CombatUpdated {
                        combat_id,
                        turn: None,
                        damage: Some(report),
                    },
                    correlation_id,
                )
                .await?;
                if ended {
                    self.finish_combat(session_id, combat_id, correlation_id)
                        .await?;
                }
                Ok(())
            }
            CombatAction::ApplyCondition {
                target_id,
                condition,
                source_id,
                duration_rounds,
            } => {
                self.authorize_current_actor(session_id, actor)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                combat.apply_condition(target_id, condition, source_id, duration_rounds)?;
                let combat_id = combat.id;
                self.broadcast_combat_update(session_id, combat_id, correlation_id)
                    .await
            }
            CombatAction::RemoveCondition {
                target_id,
                condition,
            } => {
                self.authorize_current_actor(session_id, actor)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                combat.remove_condition(target_id, condition)?;
                let combat_id = combat.id;
                self.broadcast_combat_update(session_id, combat_id, correlation_id)
                    .await
            }
            CombatAction::SetConcentration {
                caster_id,
                effect_name,
                duration_rounds,
            } => {
                self.authorize_combatant_owner(session_id, actor, caster_id)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                combat.set_concentration(
                    caster_id,
                    tavern_core::combat::ActiveEffect {
                        id: Uuid::new_v4(),
                        name: effect_name,
                        source: caster_id,
                        expires_on_round_boundary: false,
                        remaining_rounds: duration_rounds,
                    },
                )?;
                let combat_id = combat.id;
                self.broadcast_combat_update(session_id, combat_id, correlation_id)
                    .await
            }
            CombatAction::EndConcentration { caster_id } => {
                self.authorize_combatant_owner(session_id, actor, caster_id)?;
                let room = self.room_mut(session_id)?;
                let combat = room
                    .combat
                    .as_mut()
                    .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
                combat.end_concentration(caster_id)?;
                let combat_id = combat.id;
                self.broadcast_combat_update(session_id, combat_id, correlation_id)
                    .await
            }
        }
    }

    async fn start_combat(
        &mut self,
        session_id: Uuid,
        actor: Uuid,
        character_ids: Vec<Uuid>,
        npcs: Vec<super::protocol::NpcSpec>,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        self.authorize_director(session_id, actor)?;
        {
            let room = self.room_mut(session_id)?;
            if room.combat.as_ref().is_some_and(|c| c.is_active()) {
                return Err(GameError::conflict(
                    codes::COMBAT_ALREADY_ACTIVE,
                    "a combat is already running",
                ));
            }
        }

        let ctx = QueryContext::internal("hub-combat").with_user(actor);
        let mut combatants = Vec::new();
        let mut owners = HashMap::new();
        for character_id in character_ids {
            let character = self
                .characters
                .by_id(&ctx, character_id)
                .await
                .map_err(GameError::from)?
                .ok_or_else(|| GameError::not_found(codes::CHARACTER_NOT_FOUND, "character"))?;
            let combatant = Combatant::player(&character);
            owners.insert(combatant.id, character.owner_id);
            combatants.push(combatant);
        }
        for npc in npcs {
            combatants.push(Combatant::npc(npc.name, npc.hp, npc.armor_class, npc.dexterity));
        }

        let mut combat = Combat::new(session_id, combatants)?;
        let mut roller = Roller::from_seed(clock_seed());
        combat.start(&mut roller)?;
        let combat_id = combat.id;

        let room = self.room_mut(session_id)?;
        room.combat_owners = owners;
        room.combat = Some(combat.clone());
        room.session.state = StateBag::V1 {
            scene: bag_scene(&room.session.state),
            notes: bag_notes(&room.session.state),
            active_combat: Some(combat_id),
        };
        let session = room.session.clone();
        let _ = self.sessions.update(&ctx, &session).await;

        self.broadcast(
            session_id,
            GameEvent::CombatStarted {
                combat: Box::new(combat),
            },
            correlation_id,
        )
        .await?;
        info!(%session_id, %combat_id, "combat started");
        Ok(())
    }

    /// Broadcast `combat-ended`, clear the room's combat and the state-bag
    /// reference.
    async fn finish_combat(
        &mut self,
        session_id: Uuid,
        combat_id: Uuid,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        {
            let room = self.room_mut(session_id)?;
            room.combat = None;
            room.combat_owners.clear();
            room.session.state = StateBag::V1 {
                scene: bag_scene(&room.session.state),
                notes: bag_notes(&room.session.state),
                active_combat: None,
            };
            let session = room.session.clone();
            let ctx = QueryContext::internal("hub-combat");
            let _ = self.sessions.update(&ctx, &session).await;
        }
        self.broadcast(session_id, GameEvent::CombatEnded { combat_id }, correlation_id)
            .await?;
        Ok(())
    }

    async fn broadcast_combat_update(
        &mut self,
        session_id: Uuid,
        combat_id: Uuid,
        correlation_id: &str,
    ) -> Result<(), GameError> {
        self.broadcast(
            session_id,
            GameEvent::CombatUpdated {
                combat_id,
                turn: None,
                damage: None,
            },
            correlation_id,
        )
        .await?;
        Ok(())
    }

    // ── Authorization ─────────────────────────────────────────────────────────

    fn room_mut(&mut self, session_id: Uuid) -> Result<&mut Room, GameError> {
        self.rooms
            .get_mut(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))
    }

    fn authorize_director(&self, session_id: Uuid, actor: Uuid) -> Result<(), GameError> {
        let room = self
            .rooms
            .get(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
        if room.session.is_director(actor) {
            Ok(())
        } else {
            Err(GameError::authorization(codes::DIRECTOR_ONLY))
        }
    }

    /// Directors always pass; participants only while the acting combatant
    /// is a character they own.
    fn authorize_current_actor(&self, session_id: Uuid, actor: Uuid) -> Result<(), GameError> {
        let room = self
            .rooms
            .get(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
        if room.session.is_director(actor) {
            return Ok(());
        }
        let combat = room
            .combat
            .as_ref()
            .ok_or_else(|| GameError::not_found(codes::COMBAT_NOT_FOUND, "combat"))?;
        let current = combat
            .current_actor()
            .ok_or_else(|| GameError::conflict(codes::COMBAT_NOT_ACTIVE, "no turn in progress"))?;
        match room.combat_owners.get(&current.id) {
            Some(owner) if *owner == actor => Ok(()),
            _ => Err(GameError::authorization(codes::NOT_YOUR_TURN)),
        }
    }

    fn authorize_combatant_owner(
        &self,
        session_id: Uuid,
        actor: Uuid,
        combatant_id: Uuid,
    ) -> Result<(), GameError> {
        let room = self
            .rooms
            .get(&session_id)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?;
        if room.session.is_director(actor) {
            return Ok(());
        }
        match room.combat_owners.get(&combatant_id) {
            Some(owner) if *owner == actor => Ok(()),
            _ => Err(GameError::authorization(codes::NOT_AUTHORIZED)),
        }
    }
}

/// Roll seed from the wall clock; persisted with the outcome wherever the
/// roll is logged.
fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn bag_scene(bag: &StateBag) -> Option<String> {
    let StateBag::V1 { scene, .. } = bag;
    scene.clone()
}

fn bag_notes(bag: &StateBag) -> Vec<String> {
    let StateBag::V1 { notes, .. } = bag;
    notes.clone()
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tavern_store::{Database, ResponseCache};

    use super::*;

    /// Mirrors the WebSocket layer's outbound buffer size.
    const SEND_BUFFER: usize = 64;

    struct Fixture {
        handle: HubHandle,
        sessions: Arc<SessionRepo>,
        session: GameSession,
        director: Uuid,
    }

    async fn fixture(max_participants: u32) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let sessions = Arc::new(SessionRepo::new(db.clone(), cache.clone()));
        let characters = Arc::new(CharacterRepo::new(db, cache));

        let director = Uuid::new_v4();
        let mut rng = StdRng::seed_from_u64(5);
        let session =
            GameSession::new("The Ashen Vault", director, max_participants, &mut rng).unwrap();
        let ctx = QueryContext::new("fixture");
        sessions.create(&ctx, &session).await.unwrap();

        let (hub, handle) = SessionHub::new(sessions.clone(), characters);
        tokio::spawn(hub.run());

        Fixture {
            handle,
            sessions,
            session,
            director,
        }
    }

    async fn join(fixture: &Fixture, user: Uuid) {
        let ctx = QueryContext::new("fixture-join");
        fixture
            .sessions
            .add_participant(&ctx, fixture.session.id, user, None)
            .await
            .unwrap();
    }

    async fn attach(
        fixture: &Fixture,
        user: Uuid,
        last_seq: Option<u64>,
    ) -> (Registered, mpsc::Receiver<Envelope>, oneshot::Receiver<&'static str>) {
        let (tx, rx) = mpsc::channel(SEND_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();
        let registered = fixture
            .handle
            .register(
                fixture.session.id,
                user,
                format!("user-{user}"),
                tx,
                close_tx,
                last_seq,
                "corr-test".into(),
            )
            .await
            .unwrap();
        (registered, rx, close_rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn register_rejects_strangers() {
        let fixture = fixture(4).await;
        let stranger = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(SEND_BUFFER);
        let (close_tx, _close_rx) = oneshot::channel();
        let err = fixture
            .handle
            .register(
                fixture.session.id,
                stranger,
                "stranger".into(),
                tx,
                close_tx,
                None,
                "corr".into(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_A_PARTICIPANT");
    }

    #[tokio::test]
    async fn register_unknown_session_is_not_found() {
        let fixture = fixture(4).await;
        let (tx, _rx) = mpsc::channel(SEND_BUFFER);
        let (close_tx, _close_rx) = oneshot::channel();
        let err = fixture
            .handle
            .register(
                Uuid::new_v4(),
                fixture.director,
                "dm".into(),
                tx,
                close_tx,
                None,
                "corr".into(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn broadcast_sequence_is_strictly_monotonic_per_receiver() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;
        let (_reg, mut rx, _close) = attach(&fixture, player, None).await;
        // Drain the presence announcement.
        let first = next_event(&mut rx).await;
        assert_eq!(first.kind, "participant-joined");

        for i in 0..5 {
            fixture
                .handle
                .publish(
                    fixture.session.id,
                    GameEvent::Chat {
                        user_id: player,
                        character_name: None,
                        text: format!("message {i}"),
                    },
                    "corr".into(),
                )
                .await
                .unwrap();
        }

        let mut last = first.seq.unwrap();
        for _ in 0..5 {
            let env = next_event(&mut rx).await;
            let seq = env.seq.unwrap();
            assert!(seq > last, "sequence must strictly increase");
            last = seq;
        }
    }

    #[tokio::test]
    async fn first_broadcast_activates_pending_session() {
        let fixture = fixture(4).await;
        fixture
            .handle
            .publish(
                fixture.session.id,
                GameEvent::WorldEvent {
                    title: "dawn".into(),
                    description: "a red sun rises".into(),
                },
                "corr".into(),
            )
            .await
            .unwrap();

        let ctx = QueryContext::new("check");
        let stored = fixture
            .sessions
            .by_id(&ctx, fixture.session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn resume_replays_missed_events() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;

        // Produce three events with nobody attached.
        for i in 0..3 {
            fixture
                .handle
                .publish(
                    fixture.session.id,
                    GameEvent::WorldEvent {
                        title: format!("event {i}"),
                        description: String::new(),
                    },
                    "corr".into(),
                )
                .await
                .unwrap();
        }

        // Resume claiming we saw seq 1: events 2 and 3 must replay.
        let (registered, mut rx, _close) = attach(&fixture, player, Some(1)).await;
        assert!(registered.resumed);
        let a = next_event(&mut rx).await;
        let b = next_event(&mut rx).await;
        assert_eq!(a.seq, Some(2));
        assert_eq!(b.seq, Some(3));
    }

    #[tokio::test]
    async fn direct_notice_reaches_only_the_target() {
        let fixture = fixture(4).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        join(&fixture, alice).await;
        join(&fixture, bob).await;
        let (_ra, mut rx_alice, _ca) = attach(&fixture, alice, None).await;
        let (_rb, mut rx_bob, _cb) = attach(&fixture, bob, None).await;

        // Drain presence events (alice sees both joins, bob sees his own).
        let _ = next_event(&mut rx_alice).await;
        let _ = next_event(&mut rx_alice).await;
        let _ = next_event(&mut rx_bob).await;

        fixture
            .handle
            .direct(
                fixture.session.id,
                bob,
                GameEvent::WorldEvent {
                    title: "whisper".into(),
                    description: "the idol is a fake".into(),
                },
                "corr".into(),
            )
            .await
            .unwrap();

        let to_bob = next_event(&mut rx_bob).await;
        assert_eq!(to_bob.kind, "world-event");
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx_alice.recv())
                .await
                .is_err(),
            "alice must not receive the direct notice"
        );
    }

    #[tokio::test]
    async fn kick_requires_director_and_closes_the_stream() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;
        let (_reg, _rx, close_rx) = attach(&fixture, player, None).await;

        let err = fixture
            .handle
            .kick(fixture.session.id, player, player, "corr".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DIRECTOR_ONLY");

        fixture
            .handle
            .kick(fixture.session.id, fixture.director, player, "corr".into())
            .await
            .unwrap();
        let reason = tokio::time::timeout(Duration::from_secs(1), close_rx)
            .await
            .expect("close must fire")
            .unwrap();
        assert_eq!(reason, close::KICKED);
    }

    #[tokio::test]
    async fn combat_start_requires_director() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;
        let (_reg, _rx, _close) = attach(&fixture, player, None).await;

        let err = fixture
            .handle
            .combat(
                fixture.session.id,
                player,
                CombatAction::Start {
                    character_ids: vec![],
                    npcs: vec![super::super::protocol::NpcSpec {
                        name: "goblin".into(),
                        hp: 7,
                        armor_class: 15,
                        dexterity: 14,
                    }],
                },
                "corr".into(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DIRECTOR_ONLY");
    }

    #[tokio::test]
    async fn combat_flow_start_damage_end_broadcasts() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;
        let (_reg, mut rx, _close) = attach(&fixture, player, None).await;
        let _ = next_event(&mut rx).await; // presence

        fixture
            .handle
            .combat(
                fixture.session.id,
                fixture.director,
                CombatAction::Start {
                    character_ids: vec![],
                    npcs: vec![
                        super::super::protocol::NpcSpec {
                            name: "goblin".into(),
                            hp: 7,
                            armor_class: 15,
                            dexterity: 14,
                        },
                        super::super::protocol::NpcSpec {
                            name: "wolf".into(),
                            hp: 11,
                            armor_class: 13,
                            dexterity: 15,
                        },
                    ],
                },
                "corr".into(),
            )
            .await
            .unwrap();

        let started = next_event(&mut rx).await;
        assert_eq!(started.kind, "combat-started");
        let goblin_id: Uuid = {
            let combatants = started.payload["combat"]["combatants"].as_object().unwrap();
            let goblin = combatants
                .values()
                .find(|c| c["name"] == "goblin")
                .expect("goblin in order");
            serde_json::from_value(goblin["id"].clone()).unwrap()
        };

        fixture
            .handle
            .combat(
                fixture.session.id,
                fixture.director,
                CombatAction::DealDamage {
                    target_id: goblin_id,
                    amount: 20,
                    damage_type: tavern_core::DamageType::Slashing,
                },
                "corr".into(),
            )
            .await
            .unwrap();

        let updated = next_event(&mut rx).await;
        assert_eq!(updated.kind, "combat-updated");
        assert_eq!(updated.payload["damage"]["hp"], 0);

        // The goblin side still has the wolf, so combat continues; the
        // director ends it explicitly.
        fixture
            .handle
            .combat(
                fixture.session.id,
                fixture.director,
                CombatAction::End,
                "corr".into(),
            )
            .await
            .unwrap();
        let ended = next_event(&mut rx).await;
        assert_eq!(ended.kind, "combat-ended");
    }

    #[tokio::test]
    async fn slow_consumer_is_disconnected_not_waited_on() {
        let fixture = fixture(4).await;
        let player = Uuid::new_v4();
        join(&fixture, player).await;
        // Attach and never drain the outbound channel.
        let (_reg, rx, close_rx) = attach(&fixture, player, None).await;
        std::mem::forget(rx);

        // Overflow the bounded buffer.
        for i in 0..(SEND_BUFFER + 8) {
            fixture
                .handle
                .publish(
                    fixture.session.id,
                    GameEvent::WorldEvent {
                        title: format!("{i}"),
                        description: String::new(),
                    },
                    "corr".into(),
                )
                .await
                .unwrap();
        }

        let reason = tokio::time::timeout(Duration::from_secs(1), close_rx)
            .await
            .expect("close must fire")
            .unwrap();
        assert_eq!(reason, close::SLOW_CONSUMER);
    }
}
