//! Admin routes — account management.
//!
//! Every handler here requires the global admin role, except account
//! creation while no account exists yet.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::{AuthUser, MaybeAuthUser, account_error_to_api};
use crate::routes::{ApiError, ConfirmQuery};
use crate::services::account::{self, AccountUser, NewUser, UserRole};
use crate::services::{character, scene, table};
use crate::state::AppState;

fn require_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if auth.user.role == UserRole::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("admin role required"))
    }
}

/// `POST /api/admin/users` — create an account.
pub async fn create_user(
    State(state): State<AppState>,
    MaybeAuthUser(auth): MaybeAuthUser,
    Json(body): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_role = auth.as_ref().map(|a| a.user.role);
    let user = account::create_user(&state.pool, actor_role, &body)
        .await
        .map_err(|e| account_error_to_api(&e))?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /api/admin/users`
pub async fn list_users(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<AccountUser>>, ApiError> {
    require_admin(&auth)?;
    let users = account::list_users(&state.pool).await.map_err(|e| account_error_to_api(&e))?;
    Ok(Json(users))
}

#[derive(Deserialize)]
pub struct RoleBody {
    pub role: UserRole,
}

/// `PATCH /api/admin/users/{id}` — change an account's global role.
pub async fn update_user_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<RoleBody>,
) -> Result<Json<AccountUser>, ApiError> {
    require_admin(&auth)?;
    if user_id == auth.user.id && body.role != UserRole::Admin {
        return Err(ApiError::forbidden("cannot remove your own admin role"));
    }
    let user = account::set_role(&state.pool, user_id, body.role)
        .await
        .map_err(|e| account_error_to_api(&e))?;
    Ok(Json(user))
}

/// `DELETE /api/admin/users/{id}?confirm=true`
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Query(confirm): Query<ConfirmQuery>,
) -> Result<StatusCode, ApiError> {
    require_admin(&auth)?;
    confirm.require()?;
    account::delete_user(&state.pool, auth.user.id, user_id)
        .await
        .map_err(|e| account_error_to_api(&e))?;

    // Live seats cache the table role, so drop them with the account.
    for table_id in table::evict_user_everywhere(&state, user_id).await {
        character::publish_list(&state, table_id).await;
        scene::refresh_scene(&state, table_id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}
