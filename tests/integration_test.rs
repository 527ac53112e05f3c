// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests for the tavern core using the mock AI provider and
/// the in-memory store: a full table session from login material to
/// combat, dice and AI artifacts, observed through a registered stream.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tavern_core::GameEvent;
use tavern_jobs::{ArtifactSink, JobKind, JobPipeline, JobStatus, PipelineConfig};
use tavern_model::MockProvider;
use tavern_node::hub::{protocol::Envelope, HubHandle, SessionHub};
use tavern_node::services::{DiceService, RollParams, SessionRef, SessionService};
use tavern_store::{
    AiJobRepo, CharacterRepo, Database, DiceRollRepo, QueryContext, ResponseCache, SessionRepo,
    UserRepo,
};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

struct Stack {
    hub: HubHandle,
    sessions: Arc<SessionService>,
    dice: DiceService,
    pipeline: Arc<JobPipeline>,
    users: Arc<UserRepo>,
    characters: Arc<CharacterRepo>,
}

struct HubSink(HubHandle);

#[async_trait]
impl ArtifactSink for HubSink {
    async fn publish(&self, session_id: Uuid, event: GameEvent) {
        let _ = self.0.publish(session_id, event, "job".to_string()).await;
    }
}

fn stack() -> Stack {
    let db = Database::open_in_memory().unwrap();
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let users = Arc::new(UserRepo::new(db.clone()));
    let characters = Arc::new(CharacterRepo::new(db.clone(), cache.clone()));
    let sessions_repo = Arc::new(SessionRepo::new(db.clone(), cache));

    let (hub, handle) = SessionHub::new(sessions_repo.clone(), characters.clone());
    tokio::spawn(hub.run());

    let pipeline = JobPipeline::new(
        AiJobRepo::new(db.clone()),
        Arc::new(MockProvider),
        Arc::new(HubSink(handle.clone())),
        PipelineConfig {
            workers: 2,
            ..PipelineConfig::default()
        },
    );
    pipeline.start();

    Stack {
        hub: handle.clone(),
        sessions: Arc::new(SessionService::new(
            sessions_repo,
            characters.clone(),
            users.clone(),
            handle.clone(),
        )),
        dice: DiceService::new(DiceRollRepo::new(db), handle),
        pipeline,
        users,
        characters,
    }
}

fn ctx() -> QueryContext {
    QueryContext::new("integration")
}

async fn make_user(stack: &Stack, name: &str) -> Uuid {
    let user = tavern_store::User {
        id: Uuid::new_v4(),
        username: name.into(),
        email: format!("{name}@example.com"),
        password_hash: "$2b$04$x".into(),
        created_at: chrono::Utc::now(),
    };
    stack.users.create(&ctx(), &user).await.unwrap();
    user.id
}

async fn attach(stack: &Stack, session: Uuid, user: Uuid) -> mpsc::Receiver<Envelope> {
    let (tx, rx) = mpsc::channel(64);
    let (close_tx, _close_rx) = oneshot::channel();
    stack
        .hub
        .register(
            session,
            user,
            format!("user-{user}"),
            tx,
            close_tx,
            None,
            "integration".into(),
        )
        .await
        .unwrap();
    rx
}

async fn next(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("stream closed")
}

#[tokio::test]
async fn full_table_flow_chat_dice_and_ai_artifact() {
    let stack = stack();
    let director = make_user(&stack, "dm").await;
    let player = make_user(&stack, "mira").await;

    let session = stack
        .sessions
        .create(&ctx(), director, "The Drowned Keep".into(), 4)
        .await
        .unwrap();
    stack
        .sessions
        .join(&ctx(), player, SessionRef::Id(session.id), None)
        .await
        .unwrap();

    let mut rx = attach(&stack, session.id, player).await;
    let presence = next(&mut rx).await;
    assert_eq!(presence.kind, "participant-joined");
    let mut last_seq = presence.seq.unwrap();

    // Chat broadcast.
    stack
        .hub
        .publish(
            session.id,
            GameEvent::Chat {
                user_id: player,
                character_name: None,
                text: "I check the door for traps".into(),
            },
            "integration".into(),
        )
        .await
        .unwrap();

    // Dice roll: persisted, broadcast, reconstructable.
    let roll = stack
        .dice
        .roll(
            &ctx(),
            RollParams {
                user_id: player,
                session_id: Some(session.id),
                character_id: None,
                notation: "1d20+4".into(),
                modifier: 0,
                purpose: Some("investigation".into()),
            },
        )
        .await
        .unwrap();
    assert!(!roll.unlogged);
    assert_eq!(roll.total, roll.results[0] + 4);

    // AI artifact through the pipeline.
    let job_id = stack
        .pipeline
        .submit(
            &ctx(),
            JobKind::NpcDialogue,
            session.id,
            director,
            serde_json::json!({"prompt": "the innkeeper greets the party"}),
        )
        .await
        .unwrap();

    // The three events arrive in sequence order.
    let chat = next(&mut rx).await;
    assert_eq!(chat.kind, "chat");
    assert!(chat.seq.unwrap() > last_seq);
    last_seq = chat.seq.unwrap();

    let dice = next(&mut rx).await;
    assert_eq!(dice.kind, "dice-roll");
    assert!(dice.seq.unwrap() > last_seq);
    last_seq = dice.seq.unwrap();
    assert_eq!(dice.payload["roll"]["total"], roll.total);

    let artifact = next(&mut rx).await;
    assert_eq!(artifact.kind, "ai-artifact");
    assert!(artifact.seq.unwrap() > last_seq);
    assert!(artifact.payload["content"]
        .as_str()
        .unwrap()
        .contains("MOCK"));

    // The job record reached its terminal state with the same artifact.
    let job = stack.pipeline.status(&ctx(), job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn combat_over_the_hub_honors_the_rules_engine() {
    let stack = stack();
    let director = make_user(&stack, "dm").await;
    let player = make_user(&stack, "vex").await;

    let session = stack
        .sessions
        .create(&ctx(), director, "Ambush at the Ford".into(), 4)
        .await
        .unwrap();

    // A character for the player.
    let character = tavern_core::Character {
        id: Uuid::new_v4(),
        owner_id: player,
        name: "Vex".into(),
        race: "half-elf".into(),
        class: "rogue".into(),
        level: 3,
        current_hp: 21,
        max_hp: 24,
        armor_class: 15,
        abilities: tavern_core::AbilityScores {
            dexterity: 18,
            ..Default::default()
        },
        initiative_bonus: 2,
        speed: 35,
        proficiencies: vec![],
        equipment: vec![],
        spell_slots: Default::default(),
        created_at: chrono::Utc::now(),
    };
    stack.characters.create(&ctx(), &character).await.unwrap();
    stack
        .sessions
        .join(&ctx(), player, SessionRef::Id(session.id), Some(character.id))
        .await
        .unwrap();

    let mut rx = attach(&stack, session.id, player).await;
    let _presence = next(&mut rx).await;

    stack
        .hub
        .combat(
            session.id,
            director,
            tavern_node::hub::CombatAction::Start {
                character_ids: vec![character.id],
                npcs: vec![tavern_node::hub::NpcSpec {
                    name: "bandit".into(),
                    hp: 11,
                    armor_class: 12,
                    dexterity: 12,
                }],
            },
            "integration".into(),
        )
        .await
        .unwrap();

    let started = next(&mut rx).await;
    assert_eq!(started.kind, "combat-started");
    let combat = &started.payload["combat"];
    assert_eq!(combat["round"], 1);
    assert_eq!(combat["order"].as_array().unwrap().len(), 2);

    // Advance a full round: two turns wraps back to the top.
    for _ in 0..2 {
        stack
            .hub
            .combat(
                session.id,
                director,
                tavern_node::hub::CombatAction::NextTurn,
                "integration".into(),
            )
            .await
            .unwrap();
    }
    let first = next(&mut rx).await;
    assert_eq!(first.kind, "combat-updated");
    let second = next(&mut rx).await;
    assert_eq!(second.payload["turn"]["round"], 2);
    assert_eq!(second.payload["turn"]["wrapped"], true);
}

#[tokio::test]
async fn duplicate_ai_submits_collapse_to_one_job() {
    let stack = stack();
    let director = make_user(&stack, "dm").await;
    let session = stack
        .sessions
        .create(&ctx(), director, "Quiet Evening".into(), 4)
        .await
        .unwrap();

    let payload = serde_json::json!({"prompt": "describe the market square"});
    let a = stack
        .pipeline
        .submit(&ctx(), JobKind::LocationDescription, session.id, director, payload.clone())
        .await
        .unwrap();
    let b = stack
        .pipeline
        .submit(&ctx(), JobKind::LocationDescription, session.id, director, payload)
        .await
        .unwrap();
    assert_eq!(a, b, "idempotent submit must return the existing job");
}
