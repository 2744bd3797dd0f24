//! Character service — character sheets, levels and inventory load.
//!
//! DESIGN
//! ======
//! A save is a whole-record update. The patch is filtered through
//! `sheet_policy`, merged onto the stored sheet, validated, and the level is
//! recomputed from xp before the row is written back. Identity columns
//! (`id`, `table_id`, `user_id`, `created_at`) are never part of the UPDATE.
//!
//! Read, merge and write run in one transaction holding the sheet row
//! `FOR UPDATE`, so concurrent saves apply one after the other and a save
//! never writes back columns another save changed in between. The table row
//! is locked `FOR SHARE` first, the same order `table::update_table` uses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::sheet_policy::{self, PolicyError};
use crate::services::table::{self, TableRole};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CharacterError {
    #[error("character not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for CharacterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CHARACTER_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

impl From<PolicyError> for CharacterError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotOwner => Self::Forbidden(err.to_string()),
            PolicyError::UnknownField(_) => Self::Validation(err.to_string()),
        }
    }
}

pub const RACES: &[&str] = &[
    "Humano",
    "Elfo",
    "Anão",
    "Fada",
    "Homem Réptil",
    "Draconiano",
    "Orc",
    "Ogro",
    "Besta",
    "Elemental",
];

pub const CLASSES: &[&str] = &[
    "Guerreiro",
    "Assassino",
    "Paladino",
    "Monge",
    "Arqueiro",
    "Engenheiro",
    "Mago",
    "Feiticeiro",
    "Bruxo",
    "Necromante",
    "Xamã",
    "Bárbaro",
    "Caçador",
    "Pirata/Ladrão",
    "Cavaleiro",
];

pub const XP_PER_LEVEL: i32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity: i32,
    /// Weight of one unit.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Character {
    pub id: Uuid,
    pub table_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub age: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub race: Option<String>,
    pub class: Option<String>,
    pub alignment_law: Option<String>,
    pub alignment_moral: Option<String>,
    pub history: Option<String>,
    pub icon_url: Option<String>,
    pub level: i32,
    pub xp: i32,
    pub hit_points: i32,
    pub current_hp: i32,
    pub mana: i32,
    pub gold: i32,
    pub silver: i32,
    pub copper: i32,
    pub strength: i32,
    pub defense: i32,
    pub resistance: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub stealth: i32,
    pub reflexes: i32,
    pub charisma: i32,
    pub constitution: i32,
    pub light_cutting_weapons: i32,
    pub heavy_cutting_weapons: i32,
    pub short_bows: i32,
    pub long_bows: i32,
    pub spears: i32,
    pub armor: i32,
    pub horses: i32,
    pub traps: i32,
    pub potions: i32,
    pub others: i32,
    pub left_hand: Option<String>,
    pub right_hand: Option<String>,
    pub torso: Option<String>,
    pub legs: Option<String>,
    pub boots: Option<String>,
    pub belt: Option<String>,
    pub back: Option<String>,
    pub backpack_items: Json<Vec<InventoryItem>>,
    pub backpack_max_load: f64,
    pub mount_name: Option<String>,
    pub mount_items: Json<Vec<InventoryItem>>,
    pub mount_max_load: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Fields accepted when a character is first created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterDraft {
    pub name: String,
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub character: Character,
    pub stripped_fields: Vec<String>,
}

const CHARACTER_COLUMNS: &str = "id, table_id, user_id, name, age, height, weight, race, class,
     alignment_law, alignment_moral, history, icon_url, level, xp, hit_points, current_hp, mana,
     gold, silver, copper, strength, defense, resistance, intelligence, wisdom, stealth, reflexes,
     charisma, constitution, light_cutting_weapons, heavy_cutting_weapons, short_bows, long_bows,
     spears, armor, horses, traps, potions, others, left_hand, right_hand, torso, legs, boots, belt,
     back, backpack_items, backpack_max_load, mount_name, mount_items, mount_max_load, created_at";

// =============================================================================
// RULES
// =============================================================================

/// Level reached with `xp` experience, capped at the table's `max_level`.
#[must_use]
pub fn level_for_xp(xp: i32, max_level: i32) -> i32 {
    (xp.max(0) / XP_PER_LEVEL).min(max_level.max(1))
}

/// Total carried weight: sum of quantity times unit weight.
#[must_use]
pub fn inventory_load(items: &[InventoryItem]) -> f64 {
    items.iter().map(|item| f64::from(item.quantity) * item.weight).sum()
}

fn validate_choice(field: &str, value: Option<&str>, allowed: &[&str]) -> Result<(), CharacterError> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(CharacterError::Validation(format!("unknown {field}: {v}"))),
        _ => Ok(()),
    }
}

fn validate_inventory(label: &str, items: &[InventoryItem], max_load: f64) -> Result<(), CharacterError> {
    if max_load < 0.0 {
        return Err(CharacterError::Validation(format!("{label} max load must not be negative")));
    }
    for item in items {
        if item.name.trim().is_empty() {
            return Err(CharacterError::Validation(format!("{label} item name required")));
        }
        if item.quantity < 0 || item.weight < 0.0 {
            return Err(CharacterError::Validation(format!(
                "{label} item {} has negative quantity or weight",
                item.name
            )));
        }
    }
    let load = inventory_load(items);
    if load > max_load {
        return Err(CharacterError::Validation(format!("{label} load {load} exceeds max load {max_load}")));
    }
    Ok(())
}

/// Check a merged sheet before it is written.
///
/// # Errors
///
/// Returns `Validation` naming the first rule the sheet breaks.
pub fn validate_sheet(c: &Character) -> Result<(), CharacterError> {
    if c.name.trim().is_empty() {
        return Err(CharacterError::Validation("name required".into()));
    }
    validate_choice("race", c.race.as_deref(), RACES)?;
    validate_choice("class", c.class.as_deref(), CLASSES)?;

    let numerics = [
        ("xp", c.xp),
        ("hit_points", c.hit_points),
        ("current_hp", c.current_hp),
        ("mana", c.mana),
        ("gold", c.gold),
        ("silver", c.silver),
        ("copper", c.copper),
        ("strength", c.strength),
        ("defense", c.defense),
        ("resistance", c.resistance),
        ("intelligence", c.intelligence),
        ("wisdom", c.wisdom),
        ("stealth", c.stealth),
        ("reflexes", c.reflexes),
        ("charisma", c.charisma),
        ("constitution", c.constitution),
        ("light_cutting_weapons", c.light_cutting_weapons),
        ("heavy_cutting_weapons", c.heavy_cutting_weapons),
        ("short_bows", c.short_bows),
        ("long_bows", c.long_bows),
        ("spears", c.spears),
        ("armor", c.armor),
        ("horses", c.horses),
        ("traps", c.traps),
        ("potions", c.potions),
        ("others", c.others),
    ];
    if let Some((field, _)) = numerics.iter().find(|(_, v)| *v < 0) {
        return Err(CharacterError::Validation(format!("{field} must not be negative")));
    }

    validate_inventory("backpack", &c.backpack_items, c.backpack_max_load)?;
    validate_inventory("mount", &c.mount_items, c.mount_max_load)?;
    Ok(())
}

/// Recompute derived values: level from xp under the table cap, and current
/// health bounded by max health.
pub fn normalize_sheet(c: &mut Character, max_level: i32) {
    c.level = level_for_xp(c.xp, max_level);
    c.current_hp = c.current_hp.min(c.hit_points);
}

/// Merge filtered fields onto the stored sheet.
///
/// # Errors
///
/// Returns `Validation` if a field has the wrong JSON type.
pub fn merge_patch(current: &Character, fields: &Map<String, Value>) -> Result<Character, CharacterError> {
    let Value::Object(mut merged) =
        serde_json::to_value(current).map_err(|e| CharacterError::Validation(e.to_string()))?
    else {
        return Err(CharacterError::Validation("character did not serialize to an object".into()));
    };
    for (field, value) in fields {
        merged.insert(field.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(merged)).map_err(|e| CharacterError::Validation(e.to_string()))
}

fn validate_draft(draft: &CharacterDraft) -> Result<String, CharacterError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(CharacterError::Validation("name required".into()));
    }
    validate_choice("race", draft.race.as_deref(), RACES)?;
    validate_choice("class", draft.class.as_deref(), CLASSES)?;
    Ok(name.to_owned())
}

// =============================================================================
// READ
// =============================================================================

pub async fn get_character(pool: &PgPool, table_id: Uuid, character_id: Uuid) -> Result<Character, CharacterError> {
    sqlx::query_as::<_, Character>(&format!(
        "SELECT {CHARACTER_COLUMNS} FROM character_sheets WHERE id = $1 AND table_id = $2"
    ))
    .bind(character_id)
    .bind(table_id)
    .fetch_optional(pool)
    .await?
    .ok_or(CharacterError::NotFound(character_id))
}

pub async fn list_characters(pool: &PgPool, table_id: Uuid) -> Result<Vec<Character>, CharacterError> {
    let rows = sqlx::query_as::<_, Character>(&format!(
        "SELECT {CHARACTER_COLUMNS} FROM character_sheets WHERE table_id = $1 ORDER BY created_at ASC"
    ))
    .bind(table_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// =============================================================================
// CREATE / DELETE
// =============================================================================

/// Insert a character on an open connection so callers can include it in a
/// larger transaction.
pub(crate) async fn insert_character(
    conn: &mut PgConnection,
    table_id: Uuid,
    user_id: Uuid,
    draft: &CharacterDraft,
) -> Result<Character, CharacterError> {
    let name = validate_draft(draft)?;
    let character = sqlx::query_as::<_, Character>(&format!(
        "INSERT INTO character_sheets (table_id, user_id, name, race, class, icon_url)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {CHARACTER_COLUMNS}"
    ))
    .bind(table_id)
    .bind(user_id)
    .bind(name)
    .bind(&draft.race)
    .bind(&draft.class)
    .bind(&draft.icon_url)
    .fetch_one(&mut *conn)
    .await?;
    Ok(character)
}

/// Create a character. Masters may create one for another member.
///
/// # Errors
///
/// Returns `Forbidden` when a player names another owner and `Validation`
/// when the owner is not a member of the table.
pub async fn create_character(
    pool: &PgPool,
    table_id: Uuid,
    actor_id: Uuid,
    role: TableRole,
    owner_id: Option<Uuid>,
    draft: &CharacterDraft,
) -> Result<Character, CharacterError> {
    let owner_id = owner_id.unwrap_or(actor_id);
    if owner_id != actor_id {
        if !role.has_master_authority() {
            return Err(CharacterError::Forbidden("only the master can create characters for others".into()));
        }
        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM table_memberships WHERE table_id = $1 AND user_id = $2)",
        )
        .bind(table_id)
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
        if !is_member {
            return Err(CharacterError::Validation("owner is not a member of this table".into()));
        }
    }

    let mut conn = pool.acquire().await?;
    let character = insert_character(&mut conn, table_id, owner_id, draft).await?;
    info!(%table_id, character_id = %character.id, %owner_id, "character created");
    Ok(character)
}

pub async fn delete_character(
    pool: &PgPool,
    table_id: Uuid,
    role: TableRole,
    character_id: Uuid,
) -> Result<(), CharacterError> {
    if !role.has_master_authority() {
        return Err(CharacterError::Forbidden("only the master can delete characters".into()));
    }
    let deleted = sqlx::query("DELETE FROM character_sheets WHERE id = $1 AND table_id = $2")
        .bind(character_id)
        .bind(table_id)
        .execute(pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(CharacterError::NotFound(character_id));
    }
    info!(%table_id, %character_id, "character deleted");
    Ok(())
}

// =============================================================================
// SAVE
// =============================================================================

/// Save a character sheet patch under the field policy.
///
/// # Errors
///
/// Returns `Forbidden` for callers who are neither owner nor master and
/// `Validation` for bad fields or overloaded inventories.
pub async fn save_character(
    pool: &PgPool,
    table_id: Uuid,
    actor_id: Uuid,
    role: TableRole,
    character_id: Uuid,
    patch: &Map<String, Value>,
) -> Result<SaveOutcome, CharacterError> {
    let mut tx = pool.begin().await?;
    let max_level: i32 = sqlx::query_scalar("SELECT max_level FROM game_tables WHERE id = $1 FOR SHARE")
        .bind(table_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CharacterError::NotFound(character_id))?;
    let current = sqlx::query_as::<_, Character>(&format!(
        "SELECT {CHARACTER_COLUMNS} FROM character_sheets WHERE id = $1 AND table_id = $2 FOR UPDATE"
    ))
    .bind(character_id)
    .bind(table_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CharacterError::NotFound(character_id))?;

    let filtered = sheet_policy::filter_update(patch, current.user_id == actor_id, role.has_master_authority())?;
    let mut next = merge_patch(&current, &filtered.fields)?;
    normalize_sheet(&mut next, max_level);
    validate_sheet(&next)?;

    let character = write_sheet(&mut tx, &next).await?;
    tx.commit().await?;
    if !filtered.stripped_fields.is_empty() {
        info!(%character_id, %actor_id, stripped = ?filtered.stripped_fields, "stripped master-only fields from save");
    }
    Ok(SaveOutcome { character, stripped_fields: filtered.stripped_fields })
}

async fn write_sheet(conn: &mut PgConnection, c: &Character) -> Result<Character, CharacterError> {
    sqlx::query_as::<_, Character>(&format!(
        "UPDATE character_sheets SET
             name = $3, age = $4, height = $5, weight = $6, race = $7, class = $8,
             alignment_law = $9, alignment_moral = $10, history = $11, icon_url = $12,
             level = $13, xp = $14, hit_points = $15, current_hp = $16, mana = $17,
             gold = $18, silver = $19, copper = $20,
             strength = $21, defense = $22, resistance = $23, intelligence = $24, wisdom = $25,
             stealth = $26, reflexes = $27, charisma = $28, constitution = $29,
             light_cutting_weapons = $30, heavy_cutting_weapons = $31, short_bows = $32,
             long_bows = $33, spears = $34, armor = $35, horses = $36, traps = $37,
             potions = $38, others = $39,
             left_hand = $40, right_hand = $41, torso = $42, legs = $43, boots = $44,
             belt = $45, back = $46,
             backpack_items = $47, backpack_max_load = $48,
             mount_name = $49, mount_items = $50, mount_max_load = $51
         WHERE id = $1 AND table_id = $2
         RETURNING {CHARACTER_COLUMNS}"
    ))
    .bind(c.id)
    .bind(c.table_id)
    .bind(&c.name)
    .bind(&c.age)
    .bind(&c.height)
    .bind(&c.weight)
    .bind(&c.race)
    .bind(&c.class)
    .bind(&c.alignment_law)
    .bind(&c.alignment_moral)
    .bind(&c.history)
    .bind(&c.icon_url)
    .bind(c.level)
    .bind(c.xp)
    .bind(c.hit_points)
    .bind(c.current_hp)
    .bind(c.mana)
    .bind(c.gold)
    .bind(c.silver)
    .bind(c.copper)
    .bind(c.strength)
    .bind(c.defense)
    .bind(c.resistance)
    .bind(c.intelligence)
    .bind(c.wisdom)
    .bind(c.stealth)
    .bind(c.reflexes)
    .bind(c.charisma)
    .bind(c.constitution)
    .bind(c.light_cutting_weapons)
    .bind(c.heavy_cutting_weapons)
    .bind(c.short_bows)
    .bind(c.long_bows)
    .bind(c.spears)
    .bind(c.armor)
    .bind(c.horses)
    .bind(c.traps)
    .bind(c.potions)
    .bind(c.others)
    .bind(&c.left_hand)
    .bind(&c.right_hand)
    .bind(&c.torso)
    .bind(&c.legs)
    .bind(&c.boots)
    .bind(&c.belt)
    .bind(&c.back)
    .bind(&c.backpack_items)
    .bind(c.backpack_max_load)
    .bind(&c.mount_name)
    .bind(&c.mount_items)
    .bind(c.mount_max_load)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(CharacterError::NotFound(c.id))
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Reload the table's characters and broadcast them as `character:list`.
pub async fn publish_list(state: &AppState, table_id: Uuid) {
    let characters = match list_characters(&state.pool, table_id).await {
        Ok(characters) => characters,
        Err(e) => {
            warn!(%table_id, error = %e, "character list refresh failed");
            return;
        }
    };
    let mut data = Data::new();
    data.insert("characters".into(), serde_json::json!(characters));
    let frame = Frame::request("character:list", data).with_table_id(table_id);
    table::broadcast(state, table_id, &frame, None).await;
}

#[cfg(test)]
#[path = "character_test.rs"]
mod tests;
