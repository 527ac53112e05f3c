// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::Utc;
use tavern_core::error::{codes, GameError};
use tavern_core::{GameEvent, GameSession, JoinCode, Participant, SessionStatus};
use tavern_store::{
    CharacterRepo, PageRequest, QueryContext, SessionRepo, StoreError, UserRepo,
};
use uuid::Uuid;

use crate::hub::HubHandle;

/// Session lifecycle and membership.
pub struct SessionService {
    sessions: Arc<SessionRepo>,
    characters: Arc<CharacterRepo>,
    users: Arc<UserRepo>,
    hub: HubHandle,
}

impl SessionService {
    pub fn new(
        sessions: Arc<SessionRepo>,
        characters: Arc<CharacterRepo>,
        users: Arc<UserRepo>,
        hub: HubHandle,
    ) -> Self {
        Self {
            sessions,
            characters,
            users,
            hub,
        }
    }

    pub async fn create(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        name: String,
        max_participants: u32,
    ) -> Result<GameSession, GameError> {
        // Join codes collide rarely; retry a few times before giving up.
        for _ in 0..4 {
            let session =
                GameSession::new(name.clone(), director, max_participants, &mut rand::thread_rng())?;
            match self.sessions.create(ctx, &session).await {
                Ok(()) => return Ok(session),
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(GameError::internal("could not allocate a unique join code"))
    }

    /// Fetch a session the caller belongs to. Outsiders get `not-found` —
    /// the same answer as for a session that does not exist, so existence
    /// never leaks.
    pub async fn get(
        &self,
        ctx: &QueryContext,
        user: Uuid,
        session_id: Uuid,
    ) -> Result<(GameSession, Vec<Participant>), GameError> {
        let session = self.require(ctx, session_id).await?;
        let participants = self.sessions.participants(ctx, session_id).await?;
        let is_member =
            session.is_director(user) || participants.iter().any(|p| p.user_id == user);
        if !is_member {
            return Err(GameError::not_found(codes::SESSION_NOT_FOUND, "session"));
        }
        Ok((session, participants))
    }

    pub async fn list(
        &self,
        ctx: &QueryContext,
        status: SessionStatus,
        page: &PageRequest,
    ) -> Result<Vec<GameSession>, GameError> {
        Ok(self.sessions.list_by_status(ctx, status, page).await?)
    }

    /// Join by id or join code.
    pub async fn join(
        &self,
        ctx: &QueryContext,
        user: Uuid,
        session_ref: SessionRef,
        character_id: Option<Uuid>,
    ) -> Result<Participant, GameError> {
        let session = match session_ref {
            SessionRef::Id(id) => self.require(ctx, id).await?,
            SessionRef::Code(code) => self
                .sessions
                .by_join_code(ctx, &code)
                .await?
                .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))?,
        };

        if let Some(character_id) = character_id {
            let character = self
                .characters
                .by_id(ctx, character_id)
                .await?
                .ok_or_else(|| GameError::not_found(codes::CHARACTER_NOT_FOUND, "character"))?;
            if character.owner_id != user {
                return Err(GameError::authorization(codes::CHARACTER_NOT_OWNED));
            }
        }

        // Pre-check for a precise error code; the store transaction is the
        // authority under races.
        let count = self.sessions.participant_count(ctx, session.id).await?;
        session.check_capacity(count)?;

        let participant = self
            .sessions
            .add_participant(ctx, session.id, user, character_id)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) if msg.contains("full") => {
                    GameError::conflict(codes::SESSION_CAPACITY_EXCEEDED, "session is full")
                }
                StoreError::Conflict(_) => {
                    GameError::conflict(codes::ALREADY_JOINED, "already joined this session")
                }
                other => other.into(),
            })?;

        let username = self.username(ctx, user).await;
        let _ = self
            .hub
            .publish(
                session.id,
                GameEvent::ParticipantJoined {
                    user_id: user,
                    username,
                },
                ctx.correlation_id.clone(),
            )
            .await;
        Ok(participant)
    }

    pub async fn leave(
        &self,
        ctx: &QueryContext,
        user: Uuid,
        session_id: Uuid,
    ) -> Result<(), GameError> {
        let removed = self.sessions.remove_participant(ctx, session_id, user).await?;
        if !removed {
            return Err(GameError::not_found(codes::NOT_A_PARTICIPANT, "participant"));
        }
        let username = self.username(ctx, user).await;
        let _ = self
            .hub
            .publish(
                session_id,
                GameEvent::ParticipantLeft {
                    user_id: user,
                    username,
                },
                ctx.correlation_id.clone(),
            )
            .await;
        Ok(())
    }

    /// Director-only: remove a participant and sever their streams.
    pub async fn kick(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        session_id: Uuid,
        target: Uuid,
    ) -> Result<(), GameError> {
        let session = self.require(ctx, session_id).await?;
        if !session.is_director(director) {
            return Err(GameError::authorization(codes::DIRECTOR_ONLY));
        }
        if target == director {
            return Err(GameError::validation(
                codes::DIRECTOR_ONLY,
                "the director cannot kick themselves",
            ));
        }
        let removed = self
            .sessions
            .remove_participant(ctx, session_id, target)
            .await?;
        if !removed {
            return Err(GameError::not_found(codes::NOT_A_PARTICIPANT, "participant"));
        }
        // Disconnect streams and announce the departure.
        self.hub
            .kick(session_id, director, target, ctx.correlation_id.clone())
            .await?;
        Ok(())
    }

    pub async fn pause(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        session_id: Uuid,
    ) -> Result<(), GameError> {
        let mut session = self.require_directed(ctx, director, session_id).await?;
        session.pause()?;
        self.sessions.update(ctx, &session).await?;
        let _ = self
            .hub
            .publish(session_id, GameEvent::SessionPaused, ctx.correlation_id.clone())
            .await;
        Ok(())
    }

    pub async fn resume(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        session_id: Uuid,
    ) -> Result<(), GameError> {
        let mut session = self.require_directed(ctx, director, session_id).await?;
        session.resume()?;
        self.sessions.update(ctx, &session).await?;
        let _ = self
            .hub
            .publish(session_id, GameEvent::SessionResumed, ctx.correlation_id.clone())
            .await;
        Ok(())
    }

    /// End a session. Terminal: the room closes, streams drop, the join
    /// code is freed, and the row becomes immutable.
    pub async fn end(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        session_id: Uuid,
    ) -> Result<(), GameError> {
        let mut session = self.require_directed(ctx, director, session_id).await?;
        // Broadcast before flipping the status: ending the session tears
        // the room down.
        let _ = self
            .hub
            .publish(session_id, GameEvent::SessionEnded, ctx.correlation_id.clone())
            .await;
        session.end(Utc::now())?;
        self.sessions.update(ctx, &session).await?;
        self.hub.close_session(session_id).await;
        Ok(())
    }

    async fn require(
        &self,
        ctx: &QueryContext,
        session_id: Uuid,
    ) -> Result<GameSession, GameError> {
        self.sessions
            .by_id(ctx, session_id)
            .await?
            .filter(|s| s.status != SessionStatus::Ended)
            .ok_or_else(|| GameError::not_found(codes::SESSION_NOT_FOUND, "session"))
    }

    async fn require_directed(
        &self,
        ctx: &QueryContext,
        director: Uuid,
        session_id: Uuid,
    ) -> Result<GameSession, GameError> {
        let session = self.require(ctx, session_id).await?;
        if !session.is_director(director) {
            return Err(GameError::authorization(codes::DIRECTOR_ONLY));
        }
        Ok(session)
    }

    async fn username(&self, ctx: &QueryContext, user: Uuid) -> String {
        self.users
            .by_id(ctx, user)
            .await
            .ok()
            .flatten()
            .map(|u| u.username)
            .unwrap_or_default()
    }
}

/// How the join endpoint addresses a session.
pub enum SessionRef {
    Id(Uuid),
    Code(JoinCode),
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tavern_store::{Database, ResponseCache};
    use tokio::sync::{mpsc, oneshot};

    use crate::hub::SessionHub;

    use super::*;

    struct Fixture {
        svc: SessionService,
        hub: HubHandle,
        users: Arc<UserRepo>,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let sessions = Arc::new(SessionRepo::new(db.clone(), cache.clone()));
        let characters = Arc::new(CharacterRepo::new(db.clone(), cache));
        let users = Arc::new(UserRepo::new(db));
        let (hub, handle) = SessionHub::new(sessions.clone(), characters.clone());
        tokio::spawn(hub.run());
        Fixture {
            svc: SessionService::new(sessions, characters, users.clone(), handle.clone()),
            hub: handle,
            users,
        }
    }

    fn ctx() -> QueryContext {
        QueryContext::new("session-svc-test")
    }

    async fn user(fixture: &Fixture, name: &str) -> Uuid {
        let u = tavern_store::User {
            id: Uuid::new_v4(),
            username: name.into(),
            email: format!("{name}@example.com"),
            password_hash: "$2b$04$x".into(),
            created_at: Utc::now(),
        };
        fixture.users.create(&ctx(), &u).await.unwrap();
        u.id
    }

    #[tokio::test]
    async fn create_join_and_get() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let player = user(&f, "mira").await;
        let session = f
            .svc
            .create(&ctx(), director, "The Ashen Vault".into(), 4)
            .await
            .unwrap();

        f.svc
            .join(&ctx(), player, SessionRef::Id(session.id), None)
            .await
            .unwrap();

        let (fetched, participants) = f.svc.get(&ctx(), player, session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(participants.len(), 1);
    }

    #[tokio::test]
    async fn outsiders_cannot_distinguish_sessions_from_missing_ones() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let outsider = user(&f, "sneak").await;
        let session = f
            .svc
            .create(&ctx(), director, "Private Table".into(), 4)
            .await
            .unwrap();

        let for_real = f.svc.get(&ctx(), outsider, session.id).await.unwrap_err();
        let for_missing = f.svc.get(&ctx(), outsider, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(for_real.code(), for_missing.code());
        assert_eq!(for_real.kind(), for_missing.kind());
    }

    #[tokio::test]
    async fn join_by_code_works_case_insensitively() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let player = user(&f, "mira").await;
        let session = f
            .svc
            .create(&ctx(), director, "Vault".into(), 4)
            .await
            .unwrap();

        let code = JoinCode::parse(&session.join_code.as_str().to_lowercase()).unwrap();
        f.svc
            .join(&ctx(), player, SessionRef::Code(code), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn capacity_exceeded_keeps_count_and_suppresses_broadcast() {
        // Scenario: capacity 2, two joined; a third join must fail with
        // SESSION_CAPACITY_EXCEEDED, leave the count at 2, and broadcast
        // no participant-joined.
        let f = fixture();
        let director = user(&f, "dm").await;
        let session = f
            .svc
            .create(&ctx(), director, "Small Table".into(), 2)
            .await
            .unwrap();

        let a = user(&f, "a").await;
        let b = user(&f, "b").await;
        let c = user(&f, "c").await;
        f.svc
            .join(&ctx(), a, SessionRef::Id(session.id), None)
            .await
            .unwrap();
        f.svc
            .join(&ctx(), b, SessionRef::Id(session.id), None)
            .await
            .unwrap();

        // Attach the director's stream to observe broadcasts.
        let (tx, mut rx) = mpsc::channel(64);
        let (close_tx, _close_rx) = oneshot::channel();
        f.hub
            .register(session.id, director, "dm".into(), tx, close_tx, None, "corr".into())
            .await
            .unwrap();
        // Drain the director's own presence event.
        let _ = rx.recv().await;

        let err = f
            .svc
            .join(&ctx(), c, SessionRef::Id(session.id), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_CAPACITY_EXCEEDED");

        let (_, participants) = f.svc.get(&ctx(), director, session.id).await.unwrap();
        assert_eq!(participants.len(), 2);

        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "no participant-joined may be broadcast for the failed join"
        );
    }

    #[tokio::test]
    async fn double_join_conflicts() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let player = user(&f, "mira").await;
        let session = f.svc.create(&ctx(), director, "Vault".into(), 4).await.unwrap();
        f.svc
            .join(&ctx(), player, SessionRef::Id(session.id), None)
            .await
            .unwrap();
        let err = f
            .svc
            .join(&ctx(), player, SessionRef::Id(session.id), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_JOINED");
    }

    #[tokio::test]
    async fn only_the_director_may_kick() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let a = user(&f, "a").await;
        let b = user(&f, "b").await;
        let session = f.svc.create(&ctx(), director, "Vault".into(), 4).await.unwrap();
        f.svc.join(&ctx(), a, SessionRef::Id(session.id), None).await.unwrap();
        f.svc.join(&ctx(), b, SessionRef::Id(session.id), None).await.unwrap();

        let err = f.svc.kick(&ctx(), a, session.id, b).await.unwrap_err();
        assert_eq!(err.code(), "DIRECTOR_ONLY");

        f.svc.kick(&ctx(), director, session.id, b).await.unwrap();
        let (_, participants) = f.svc.get(&ctx(), director, session.id).await.unwrap();
        assert_eq!(participants.len(), 1);
    }

    #[tokio::test]
    async fn ended_sessions_are_immutable_and_unjoinable() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let player = user(&f, "mira").await;
        let session = f.svc.create(&ctx(), director, "Vault".into(), 4).await.unwrap();

        f.svc.end(&ctx(), director, session.id).await.unwrap();

        let err = f
            .svc
            .join(&ctx(), player, SessionRef::Id(session.id), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");

        let err = f.svc.pause(&ctx(), director, session.id).await.unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn pause_resume_round_trip() {
        let f = fixture();
        let director = user(&f, "dm").await;
        let session = f.svc.create(&ctx(), director, "Vault".into(), 4).await.unwrap();

        // Activate with a broadcast first.
        let _ = f
            .hub
            .publish(
                session.id,
                GameEvent::WorldEvent {
                    title: "dawn".into(),
                    description: String::new(),
                },
                "corr".into(),
            )
            .await
            .unwrap();

        f.svc.pause(&ctx(), director, session.id).await.unwrap();
        let (paused, _) = f.svc.get(&ctx(), director, session.id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        f.svc.resume(&ctx(), director, session.id).await.unwrap();
        let (resumed, _) = f.svc.get(&ctx(), director, session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
    }
}
