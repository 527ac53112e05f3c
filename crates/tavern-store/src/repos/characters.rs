// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tavern_core::Character;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::context::QueryContext;
use crate::db::{integer, text, Database, Params};
use crate::error::StoreError;

use super::{fmt_time, get_json, get_time, get_uuid, to_json};

const REPO: &str = "characters";
/// Reads invalidated by any character write.
const READS: &[&str] = &["by_id", "list_by_owner"];

const COLUMNS: &str = "id, user_id, name, race, class, level, current_hp, max_hp, armor_class, \
     abilities, initiative_bonus, speed, proficiencies, equipment, spell_slots, created_at";

pub struct CharacterRepo {
    db: Arc<Database>,
    cache: Arc<ResponseCache>,
}

impl CharacterRepo {
    pub fn new(db: Arc<Database>, cache: Arc<ResponseCache>) -> Self {
        Self { db, cache }
    }

    pub async fn create(&self, ctx: &QueryContext, c: &Character) -> Result<(), StoreError> {
        self.db
            .execute(
                ctx,
                "INSERT INTO characters (id, user_id, name, race, class, level, current_hp, max_hp, \
                 armor_class, abilities, initiative_bonus, speed, proficiencies, equipment, \
                 spell_slots, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                character_params(c),
            )
            .await?;
        self.cache.invalidate(REPO, READS);
        Ok(())
    }

    pub async fn update(&self, ctx: &QueryContext, c: &Character) -> Result<(), StoreError> {
        let mut params: Params = character_params(c);
        // Move the id from the front to the WHERE clause position.
        let id = params.remove(0);
        params.remove(0); // user_id is immutable
        params.push(id);
        let changed = self
            .db
            .execute(
                ctx,
                "UPDATE characters SET name = ?, race = ?, class = ?, level = ?, current_hp = ?, \
                 max_hp = ?, armor_class = ?, abilities = ?, initiative_bonus = ?, speed = ?, \
                 proficiencies = ?, equipment = ?, spell_slots = ?, created_at = ? WHERE id = ?",
                params,
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "character",
            });
        }
        self.cache.invalidate(REPO, READS);
        Ok(())
    }

    pub async fn delete(&self, ctx: &QueryContext, id: Uuid) -> Result<(), StoreError> {
        let changed = self
            .db
            .execute(
                ctx,
                "DELETE FROM characters WHERE id = ?",
                vec![text(id.to_string())],
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "character",
            });
        }
        self.cache.invalidate(REPO, READS);
        Ok(())
    }

    pub async fn by_id(
        &self,
        ctx: &QueryContext,
        id: Uuid,
    ) -> Result<Option<Character>, StoreError> {
        let db = self.db.clone();
        let ctx = ctx.clone();
        self.cache
            .get_or_load(REPO, "by_id", &id, None, None, move || async move {
                db.query_opt(
                    &ctx,
                    &format!("SELECT {COLUMNS} FROM characters WHERE id = ?"),
                    vec![text(id.to_string())],
                    map_character,
                )
                .await
            })
            .await
    }

    pub async fn list_by_owner(
        &self,
        ctx: &QueryContext,
        owner: Uuid,
    ) -> Result<Vec<Character>, StoreError> {
        let db = self.db.clone();
        let ctx = ctx.clone();
        self.cache
            .get_or_load(
                REPO,
                "list_by_owner",
                &owner,
                Some(owner),
                None,
                move || async move {
                    db.query_all(
                        &ctx,
                        &format!(
                            "SELECT {COLUMNS} FROM characters WHERE user_id = ? ORDER BY created_at, id"
                        ),
                        vec![text(owner.to_string())],
                        map_character,
                    )
                    .await
                },
            )
            .await
    }
}

fn character_params(c: &Character) -> Params {
    vec![
        text(c.id.to_string()),
        text(c.owner_id.to_string()),
        text(&c.name),
        text(&c.race),
        text(&c.class),
        integer(i64::from(c.level)),
        integer(i64::from(c.current_hp)),
        integer(i64::from(c.max_hp)),
        integer(i64::from(c.armor_class)),
        text(to_json(&c.abilities)),
        integer(i64::from(c.initiative_bonus)),
        integer(i64::from(c.speed)),
        text(to_json(&c.proficiencies)),
        text(to_json(&c.equipment)),
        text(to_json(&c.spell_slots)),
        text(fmt_time(c.created_at)),
    ]
}

fn map_character(row: &rusqlite::Row<'_>) -> rusqlite::Result<Character> {
    Ok(Character {
        id: get_uuid(row, 0)?,
        owner_id: get_uuid(row, 1)?,
        name: row.get(2)?,
        race: row.get(3)?,
        class: row.get(4)?,
        level: row.get(5)?,
        current_hp: row.get(6)?,
        max_hp: row.get(7)?,
        armor_class: row.get(8)?,
        abilities: get_json(row, 9)?,
        initiative_bonus: row.get(10)?,
        speed: row.get(11)?,
        proficiencies: get_json(row, 12)?,
        equipment: get_json(row, 13)?,
        spell_slots: get_json(row, 14)?,
        created_at: get_time(row, 15)?,
    })
}

// ── Unit tests ────────────────────────────────────────────────────────────────
