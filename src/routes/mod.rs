//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API and the websocket endpoint under a single
//! Axum router. REST covers accounts, table management and invitations;
//! everything that happens inside a running table goes over `/api/ws`.

pub mod admin;
pub mod auth;
pub mod tables;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post, put};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::frame::ErrorCode;
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/api/admin/users/{id}", patch(admin::update_user_role).delete(admin::delete_user))
        .route("/api/tables", get(tables::list_tables).post(tables::create_table))
        .route("/api/tables/{id}", get(tables::get_table).patch(tables::update_table))
        .route("/api/tables/{id}/turn", put(tables::set_turn))
        .route("/api/tables/{id}/members", get(tables::list_members))
        .route("/api/tables/{id}/members/{user_id}", delete(tables::kick_member))
        .route("/api/tables/{id}/invitations", post(tables::create_invitation))
        .route("/api/invitations/{token}", get(tables::preview_invitation))
        .route("/api/invitations/{token}/redeem", post(tables::redeem_invitation))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// SHARED
// =============================================================================

/// JSON error body: `{ "code": "E_...", "message": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { status, code: err.error_code(), message: err.to_string() }
    }

    pub fn unauthorized() -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "E_UNAUTHORIZED", message: "authentication required".into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self { status: StatusCode::FORBIDDEN, code: "E_FORBIDDEN", message: message.into() }
    }

    pub fn internal() -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: "E_INTERNAL", message: "internal error".into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "code": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// `?confirm=true`, required by destructive operations.
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

impl ConfirmQuery {
    /// # Errors
    ///
    /// Returns a 400 unless `confirm=true` was sent.
    pub fn require(&self) -> Result<(), ApiError> {
        if self.confirm {
            Ok(())
        } else {
            Err(ApiError {
                status: StatusCode::BAD_REQUEST,
                code: "E_CONFIRMATION_REQUIRED",
                message: "destructive operation requires confirm=true".into(),
            })
        }
    }
}
