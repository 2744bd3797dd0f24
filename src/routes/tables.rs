//! Table management and invitation routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::{Frame, to_data};
use crate::routes::auth::AuthUser;
use crate::routes::{ApiError, ConfirmQuery};
use crate::services::character::{self, CharacterDraft};
use crate::services::invitation::{self, InvitationError, InvitationPreview, RedeemOutcome};
use crate::services::table::{self, GameTable, MemberRow, TableError, TablePatch, TablePermission, TableSummary};
use crate::services::{presence, scene};
use crate::state::AppState;

pub(crate) fn table_error_to_api(err: &TableError) -> ApiError {
    let status = match err {
        TableError::NotFound(_) => StatusCode::NOT_FOUND,
        TableError::Forbidden(_) => StatusCode::FORBIDDEN,
        TableError::Validation(_) => StatusCode::BAD_REQUEST,
        TableError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError::new(status, err)
}

pub(crate) fn invitation_error_to_api(err: &InvitationError) -> ApiError {
    let status = match err {
        InvitationError::NotFound => StatusCode::NOT_FOUND,
        InvitationError::Expired | InvitationError::AlreadyUsed => StatusCode::GONE,
        InvitationError::Character(character::CharacterError::Validation(_)) => StatusCode::BAD_REQUEST,
        InvitationError::Character(_) | InvitationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError::new(status, err)
}

async fn require(
    state: &AppState,
    table_id: Uuid,
    auth: &AuthUser,
    permission: TablePermission,
) -> Result<(), ApiError> {
    table::ensure_table_permission(&state.pool, table_id, auth.user.id, permission)
        .await
        .map(|_| ())
        .map_err(|e| table_error_to_api(&e))
}

async fn broadcast_table_updated(state: &AppState, table: &GameTable) {
    let frame = Frame::request("table:updated", to_data(table)).with_table_id(table.id);
    table::broadcast(state, table.id, &frame, None).await;
}

// =============================================================================
// TABLES
// =============================================================================

/// `GET /api/tables` — tables the caller belongs to.
pub async fn list_tables(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<TableSummary>>, ApiError> {
    let rows = table::list_tables_for_user(&state.pool, auth.user.id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
pub struct CreateTableBody {
    pub name: String,
    pub description: Option<String>,
    pub max_level: Option<i32>,
}

/// `POST /api/tables` — create a table; the caller becomes its master.
pub async fn create_table(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateTableBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !auth.user.role.can_create_tables() {
        return Err(ApiError::forbidden("master or admin role required"));
    }
    let table = table::create_table(&state.pool, &body.name, body.description.as_deref(), body.max_level, auth.user.id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    Ok((StatusCode::CREATED, Json(table)))
}

/// `GET /api/tables/{id}`
pub async fn get_table(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table_id): Path<Uuid>,
) -> Result<Json<GameTable>, ApiError> {
    require(&state, table_id, &auth, TablePermission::View).await?;
    let table = table::get_table(&state.pool, table_id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    Ok(Json(table))
}

/// `PATCH /api/tables/{id}` — master edits name, description or level cap.
pub async fn update_table(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table_id): Path<Uuid>,
    Json(body): Json<TablePatch>,
) -> Result<Json<GameTable>, ApiError> {
    require(&state, table_id, &auth, TablePermission::Master).await?;
    let table = table::update_table(&state.pool, table_id, &body)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    broadcast_table_updated(&state, &table).await;
    if body.max_level.is_some() {
        character::publish_list(&state, table_id).await;
    }
    Ok(Json(table))
}

#[derive(Deserialize)]
pub struct TurnBody {
    pub character_id: Option<Uuid>,
}

/// `PUT /api/tables/{id}/turn` — set or clear whose turn it is.
pub async fn set_turn(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table_id): Path<Uuid>,
    Json(body): Json<TurnBody>,
) -> Result<Json<GameTable>, ApiError> {
    require(&state, table_id, &auth, TablePermission::Master).await?;
    let table = table::set_turn(&state.pool, table_id, body.character_id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    broadcast_table_updated(&state, &table).await;
    Ok(Json(table))
}

// =============================================================================
// MEMBERS
// =============================================================================

#[derive(Serialize)]
pub struct MemberResponse {
    #[serde(flatten)]
    pub member: MemberRow,
    pub online: bool,
}

/// `GET /api/tables/{id}/members`
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table_id): Path<Uuid>,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    require(&state, table_id, &auth, TablePermission::View).await?;
    let rows = table::list_members(&state.pool, table_id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    let online = presence::online_users(&state, table_id).await;

    Ok(Json(
        rows.into_iter()
            .map(|member| {
                let online = online.iter().any(|u| u.user_id == member.user_id);
                MemberResponse { member, online }
            })
            .collect(),
    ))
}

/// `DELETE /api/tables/{id}/members/{user_id}?confirm=true` — remove a
/// member and their characters.
pub async fn kick_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table_id, user_id)): Path<(Uuid, Uuid)>,
    Query(confirm): Query<ConfirmQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require(&state, table_id, &auth, TablePermission::Master).await?;
    confirm.require()?;

    let deleted_characters = table::kick_member(&state.pool, table_id, auth.user.id, user_id)
        .await
        .map_err(|e| table_error_to_api(&e))?;
    let disconnected = table::evict_user(&state, table_id, user_id).await;

    character::publish_list(&state, table_id).await;
    scene::refresh_scene(&state, table_id).await;

    Ok(Json(serde_json::json!({
        "deleted_characters": deleted_characters,
        "disconnected": disconnected,
    })))
}

// =============================================================================
// INVITATIONS
// =============================================================================

/// `POST /api/tables/{id}/invitations` — master issues a single-use link.
pub async fn create_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require(&state, table_id, &auth, TablePermission::Master).await?;
    let created = invitation::create_invitation(&state.pool, table_id, auth.user.id, state.config.invitation_ttl_hours)
        .await
        .map_err(|e| invitation_error_to_api(&e))?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/invitations/{token}` — table name and whether the link still works.
pub async fn preview_invitation(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<InvitationPreview>, ApiError> {
    let preview = invitation::preview_invitation(&state.pool, &token)
        .await
        .map_err(|e| invitation_error_to_api(&e))?;
    Ok(Json(preview))
}

#[derive(Deserialize, Default)]
pub struct RedeemBody {
    #[serde(default)]
    pub character: Option<CharacterDraft>,
}

/// `POST /api/invitations/{token}/redeem`
pub async fn redeem_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
    body: Option<Json<RedeemBody>>,
) -> Result<Json<RedeemOutcome>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let outcome = invitation::redeem_invitation(&state.pool, &token, auth.user.id, body.character.as_ref())
        .await
        .map_err(|e| invitation_error_to_api(&e))?;

    if outcome.character.is_some() {
        character::publish_list(&state, outcome.table_id).await;
    }
    Ok(Json(outcome))
}

#[cfg(test)]
#[path = "tables_test.rs"]
mod tests;
