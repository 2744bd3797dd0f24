//! WebSocket handler — live table sessions.
//!
//! DESIGN
//! ======
//! On upgrade the ticket is consumed and the connection enters a `select!`
//! loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from table peers → forward to client
//!
//! Handler functions validate, call into the services, and return an
//! `Outcome`. The dispatch layer owns the outbound side: reply to sender and
//! broadcast to peers. Scene and character-list refreshes are the exception;
//! they go to every client of the table, sender included.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `table:join` → membership check, `presence:join` to peers, scene reply
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Close → `presence:part` to peers → cleanup

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status, to_data};
use crate::services::character::{self, CharacterDraft};
use crate::services::health::{self, Direction, HealthTarget};
use crate::services::journal::{self, EntryInput, JournalError};
use crate::services::token::{self, PlaceOutcome, PlaceRequest, Rect, ResizeTarget, TokenError};
use crate::services::{chat, dice, presence, scene, session, table};
use crate::state::{AppState, ConnectedClient};

/// Outbound buffer per connection. Broadcasts beyond this are dropped.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what.
enum Outcome {
    /// Send done+data to sender; peers get the same data as a `notify`
    /// request frame.
    Broadcast { notify: &'static str, data: Data },
    /// Relay data to all table peers EXCLUDING sender. No reply to sender.
    /// Used for drag moves (ephemeral, no persistence).
    BroadcastExcludeSender(Data),
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
}

/// The joined table and the caller's identity within it.
struct Seat {
    table_id: Uuid,
    client: ConnectedClient,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match session::consume_ws_ticket(&state.pool, ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, %user_id, "ws: client connected");

    let mut current_table: Option<Uuid> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_inbound_text(&state, &mut current_table, client_id, user_id, &client_tx, &text)
                                .await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    leave_current_table(&state, &mut current_table, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

/// Announce the part to peers, then drop the client from the live table.
async fn leave_current_table(state: &AppState, current_table: &mut Option<Uuid>, client_id: Uuid) {
    let Some(table_id) = current_table.take() else {
        return;
    };
    if let Some(client) = table::connected_client(state, table_id, client_id).await {
        presence::announce_part(state, table_id, client_id, &client).await;
    }
    table::part_table(state, table_id, client_id).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(
    state: &AppState,
    current_table: &mut Option<Uuid>,
    client_id: Uuid,
    user_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    req.from = Some(user_id.to_string());
    if !is_chatty(&req.syscall) {
        info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    // Any inbound frame counts as liveness.
    if let Some(table_id) = *current_table {
        if let Some(revived) = presence::touch(state, table_id, client_id).await {
            presence::announce_join(state, table_id, client_id, &revived).await;
        }
    }

    let result = match req.prefix() {
        "table" => handle_table(state, current_table, client_id, user_id, client_tx, &req).await,
        prefix => match seat(state, current_table, client_id, &req).await {
            Err(err) => Err(err),
            Ok(seat) => match prefix {
                "scene" => handle_scene(state, &seat, &req).await,
                "map" => handle_map(state, &seat, &req).await,
                "token" => handle_token(state, &seat, &req).await,
                "drag" => handle_drag(state, &seat, client_id, &req).await,
                "health" => handle_health(state, &seat, &req).await,
                "character" => handle_character(state, &seat, &req).await,
                "chat" => handle_chat(state, &seat, &req).await,
                "dice" => handle_dice(state, &seat, &req).await,
                "journal" => handle_journal(state, &seat, &req).await,
                "presence" => handle_presence(state, &seat, &req).await,
                _ => Err(req.error(format!("unknown prefix: {prefix}"))),
            },
        },
    };

    let table_id = *current_table;
    match result {
        Ok(Outcome::Broadcast { notify, data }) => {
            if let Some(tid) = table_id {
                let notice = Frame::request(notify, data.clone())
                    .with_table_id(tid)
                    .with_from(user_id.to_string());
                table::broadcast(state, tid, &notice, Some(client_id)).await;
            }
            vec![req.done_with(data)]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            if let Some(tid) = table_id {
                let frame = Frame::request(&req.syscall, data).with_table_id(tid);
                table::broadcast(state, tid, &frame, Some(client_id)).await;
            }
            vec![]
        }
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

/// Resolve the caller's seat at the joined table. A client evicted by a
/// kick loses its seat here.
async fn seat(
    state: &AppState,
    current_table: &mut Option<Uuid>,
    client_id: Uuid,
    req: &Frame,
) -> Result<Seat, Frame> {
    let Some(table_id) = *current_table else {
        return Err(req.error("must join a table first"));
    };
    let Some(client) = table::connected_client(state, table_id, client_id).await else {
        *current_table = None;
        return Err(req.error("must join a table first"));
    };
    Ok(Seat { table_id, client })
}

/// High-frequency syscalls that stay out of the info log.
fn is_chatty(syscall: &str) -> bool {
    matches!(syscall, "drag:move" | "presence:ping")
}

// =============================================================================
// TABLE HANDLERS
// =============================================================================

async fn handle_table(
    state: &AppState,
    current_table: &mut Option<Uuid>,
    client_id: Uuid,
    user_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(table_id) = req.table_id.or_else(|| req.uuid("table_id")) else {
                return Err(req.error("table_id required"));
            };

            // Switching tables parts the old one first.
            leave_current_table(state, current_table, client_id).await;

            let info = table::join_table(state, table_id, user_id, client_id, client_tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            *current_table = Some(table_id);

            if let Some(client) = table::connected_client(state, table_id, client_id).await {
                presence::announce_join(state, table_id, client_id, &client).await;
            }

            let scene = match scene::cached_scene(state, table_id).await {
                Some(snapshot) => snapshot,
                None => scene::refresh_scene(state, table_id).await.unwrap_or_default(),
            };

            let mut data = Data::new();
            data.insert("client_id".into(), json!(client_id));
            data.insert("table".into(), json!(to_data(&info.table)));
            data.insert("role".into(), json!(info.role));
            data.insert("display_name".into(), json!(info.display_name));
            data.insert("scene".into(), json!(to_data(&scene)));
            data.insert("online".into(), json!(presence::online_users(state, table_id).await));
            Ok(Outcome::Reply(data))
        }
        "part" => {
            leave_current_table(state, current_table, client_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown table op: {op}"))),
    }
}

// =============================================================================
// SCENE & MAP HANDLERS
// =============================================================================

async fn handle_scene(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "load" => {
            let snapshot = scene::load_scene(&state.pool, seat.table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::publish_snapshot(state, seat.table_id, &snapshot).await;
            Ok(Outcome::Reply(to_data(&snapshot)))
        }
        op => Err(req.error(format!("unknown scene op: {op}"))),
    }
}

async fn handle_map(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    let table_id = seat.table_id;
    let role = seat.client.role;

    match req.op() {
        "list" => {
            let maps = scene::list_maps(&state.pool, table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("maps".into(), json!(maps));
            Ok(Outcome::Reply(data))
        }
        "create" => {
            let name = req.str("name").unwrap_or_default();
            let image_url = req.str("image_url").unwrap_or_default();
            let activate = req.data.get("activate").and_then(Value::as_bool).unwrap_or(false);
            let map = scene::create_map(&state.pool, table_id, role, name, image_url, activate)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Reply(to_data(&map)))
        }
        "activate" => {
            let map_id = required_uuid(req, "map_id")?;
            let map = scene::activate_map(&state.pool, table_id, role, map_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Reply(to_data(&map)))
        }
        "delete" => {
            let map_id = required_uuid(req, "map_id")?;
            scene::delete_map(&state.pool, table_id, role, map_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown map op: {op}"))),
    }
}

// =============================================================================
// TOKEN HANDLERS
// =============================================================================

fn place_request(req: &Frame) -> Result<PlaceRequest, Frame> {
    if let Some(character_id) = req.uuid("character_id") {
        return Ok(PlaceRequest::Character { character_id });
    }
    let Some(name) = req.str("name") else {
        return Err(req.error("character_id or enemy name required"));
    };
    Ok(PlaceRequest::Enemy {
        name: name.to_owned(),
        icon_url: req.str("icon_url").map(str::to_owned),
        max_hit_points: req.i32("max_hit_points").unwrap_or(0),
        hit_points: req.i32("hit_points"),
    })
}

fn resize_target(req: &Frame) -> Result<ResizeTarget, Frame> {
    if let Some(rect) = req.data.get("rect") {
        let rect: Rect = serde_json::from_value(rect.clone()).map_err(|e| req.error(format!("invalid rect: {e}")))?;
        return Ok(ResizeTarget::Rect(rect));
    }
    if let Some(ids) = req.data.get("token_ids").and_then(Value::as_array) {
        let ids = uuid_list(ids).map_err(|bad| {
            req.error_from(&TokenError::Validation(format!("invalid token id: {bad}")))
        })?;
        return Ok(ResizeTarget::Ids(ids));
    }
    let token_id = required_uuid(req, "token_id")?;
    Ok(ResizeTarget::Ids(vec![token_id]))
}

/// Optional `(x, y)` pair; both coordinates must be present.
fn position(req: &Frame) -> Option<(f64, f64)> {
    Some((req.f64("x")?, req.f64("y")?))
}

async fn handle_token(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    let table_id = seat.table_id;
    let role = seat.client.role;

    match req.op() {
        "place" => {
            let request = place_request(req)?;
            let outcome = token::place_token(
                &state.pool,
                table_id,
                seat.client.user_id,
                role,
                request,
                position(req),
                req.i32("size"),
            )
            .await
            .map_err(|e| req.error_from(&e))?;

            match outcome {
                PlaceOutcome::Placed(token) => {
                    scene::refresh_scene(state, table_id).await;
                    Ok(Outcome::Reply(to_data(&token)))
                }
                PlaceOutcome::AlreadyPlaced { token_id } => {
                    let mut data = Data::new();
                    data.insert("already_placed".into(), json!(true));
                    data.insert("token_id".into(), json!(token_id));
                    Ok(Outcome::Reply(data))
                }
            }
        }
        "move" => {
            let token_id = required_uuid(req, "token_id")?;
            let Some((x, y)) = position(req) else {
                return Err(req.error("x and y required"));
            };
            let (x, y) = token::move_token(&state.pool, table_id, role, token_id, x, y)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Reply(token_position_data(token_id, x, y)))
        }
        "resize" => {
            let Some(size) = req.i32("size") else {
                return Err(req.error("size required"));
            };
            let target = resize_target(req)?;
            let resized = token::resize_tokens(&state.pool, table_id, role, target, size)
                .await
                .map_err(|e| req.error_from(&e))?;
            if !resized.is_empty() {
                scene::refresh_scene(state, table_id).await;
            }
            let mut data = Data::new();
            data.insert("token_ids".into(), json!(resized));
            data.insert("size".into(), json!(token::clamp_size(size)));
            Ok(Outcome::Reply(data))
        }
        "remove" => {
            let token_id = required_uuid(req, "token_id")?;
            token::remove_token(&state.pool, table_id, role, token_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            {
                let mut tables = state.tables.write().await;
                if let Some(table_state) = tables.get_mut(&table_id) {
                    table_state.drags.forget_token(token_id);
                }
            }
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown token op: {op}"))),
    }
}

fn token_position_data(token_id: Uuid, x: f64, y: f64) -> Data {
    let mut data = Data::new();
    data.insert("token_id".into(), json!(token_id));
    data.insert("x".into(), json!(x));
    data.insert("y".into(), json!(y));
    data
}

// =============================================================================
// DRAG HANDLERS
// =============================================================================

async fn handle_drag(state: &AppState, seat: &Seat, client_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    let table_id = seat.table_id;
    let token_id = required_uuid(req, "token_id")?;

    match req.op() {
        "start" => {
            if !seat.client.role.has_master_authority() {
                return Err(req.error_from(&TokenError::Forbidden("only the master can drag tokens")));
            }
            let (x, y) = match position(req) {
                Some(pos) => pos,
                None => token::token_position(&state.pool, table_id, token_id)
                    .await
                    .map_err(|e| req.error_from(&e))?,
            };
            let mut tables = state.tables.write().await;
            let Some(table_state) = tables.get_mut(&table_id) else {
                return Err(req.error("must join a table first"));
            };
            let (x, y) = table_state
                .drags
                .begin(token_id, client_id, x, y)
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(token_position_data(token_id, x, y)))
        }
        "move" => {
            let Some((x, y)) = position(req) else {
                return Err(req.error("x and y required"));
            };
            let (x, y) = {
                let mut tables = state.tables.write().await;
                let Some(table_state) = tables.get_mut(&table_id) else {
                    return Err(req.error("must join a table first"));
                };
                table_state
                    .drags
                    .update(token_id, client_id, x, y)
                    .map_err(|e| req.error_from(&e))?
            };
            let mut data = token_position_data(token_id, x, y);
            data.insert("client_id".into(), json!(client_id));
            Ok(Outcome::BroadcastExcludeSender(data))
        }
        "end" => {
            let released = {
                let mut tables = state.tables.write().await;
                tables
                    .get_mut(&table_id)
                    .and_then(|t| t.drags.release(token_id, client_id, position(req)))
            };
            // A repeated or unknown end is a no-op.
            let Some((x, y)) = released else {
                return Ok(Outcome::Done);
            };
            let (x, y) = token::move_token(&state.pool, table_id, seat.client.role, token_id, x, y)
                .await
                .map_err(|e| req.error_from(&e))?;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Reply(token_position_data(token_id, x, y)))
        }
        op => Err(req.error(format!("unknown drag op: {op}"))),
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

async fn handle_health(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "apply" => {
            let target = match (req.uuid("token_id"), req.uuid("character_id")) {
                (Some(token_id), _) => HealthTarget::Token(token_id),
                (None, Some(character_id)) => HealthTarget::Character(character_id),
                (None, None) => return Err(req.error("token_id or character_id required")),
            };
            let Some(direction) = req.str("direction").and_then(Direction::parse) else {
                return Err(req.error("direction must be damage or heal"));
            };
            let Some(amount) = req.i32("amount") else {
                return Err(req.error("amount required"));
            };

            let change =
                health::apply_to_target(&state.pool, seat.table_id, seat.client.role, target, amount, direction)
                    .await
                    .map_err(|e| req.error_from(&e))?;
            let Some(change) = change else {
                let mut data = Data::new();
                data.insert("changed".into(), json!(false));
                return Ok(Outcome::Reply(data));
            };

            if change.character_id.is_some() {
                character::publish_list(state, seat.table_id).await;
            }
            scene::refresh_scene(state, seat.table_id).await;

            let mut data = to_data(&change);
            data.insert("changed".into(), json!(true));
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown health op: {op}"))),
    }
}

// =============================================================================
// CHARACTER HANDLERS
// =============================================================================

async fn handle_character(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    let table_id = seat.table_id;
    let role = seat.client.role;

    match req.op() {
        "create" => {
            let draft: CharacterDraft = serde_json::to_value(&req.data)
                .and_then(serde_json::from_value)
                .map_err(|e| req.error(format!("invalid character: {e}")))?;
            let created = character::create_character(
                &state.pool,
                table_id,
                seat.client.user_id,
                role,
                req.uuid("user_id"),
                &draft,
            )
            .await
            .map_err(|e| req.error_from(&e))?;
            character::publish_list(state, table_id).await;
            Ok(Outcome::Reply(to_data(&created)))
        }
        "get" => {
            let character_id = required_uuid(req, "character_id")?;
            let found = character::get_character(&state.pool, table_id, character_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&found)))
        }
        "list" => {
            let characters = character::list_characters(&state.pool, table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("characters".into(), json!(characters));
            Ok(Outcome::Reply(data))
        }
        "save" => {
            let character_id = required_uuid(req, "character_id")?;
            let Some(fields) = req.data.get("fields").and_then(Value::as_object) else {
                return Err(req.error("fields object required"));
            };
            let saved =
                character::save_character(&state.pool, table_id, seat.client.user_id, role, character_id, fields)
                    .await
                    .map_err(|e| req.error_from(&e))?;
            character::publish_list(state, table_id).await;
            scene::refresh_scene(state, table_id).await;

            let mut data = Data::new();
            data.insert("character".into(), json!(to_data(&saved.character)));
            data.insert("stripped_fields".into(), json!(saved.stripped_fields));
            Ok(Outcome::Reply(data))
        }
        "delete" => {
            let character_id = required_uuid(req, "character_id")?;
            character::delete_character(&state.pool, table_id, role, character_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            character::publish_list(state, table_id).await;
            scene::refresh_scene(state, table_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown character op: {op}"))),
    }
}

// =============================================================================
// CHAT & DICE HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "send" => {
            let raw = req.str("message").unwrap_or_default();
            let message = chat::send_message(
                &state.pool,
                seat.table_id,
                seat.client.user_id,
                &seat.client.display_name,
                raw,
            )
            .await
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { notify: "chat:message", data: to_data(&message) })
        }
        "list" => {
            let messages = chat::list_messages(&state.pool, seat.table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("messages".into(), json!(messages));
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

async fn handle_dice(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "roll" => {
            let num_dice = req.i32("num_dice").unwrap_or(1);
            let num_faces = req.i32("num_faces").unwrap_or(20);
            dice::validate_roll(num_dice, num_faces).map_err(|e| req.error_from(&e))?;
            let character_name = req.str("character_name");

            let mut rolling = Data::new();
            rolling.insert("user_id".into(), json!(seat.client.user_id));
            rolling.insert("display_name".into(), json!(seat.client.display_name));
            rolling.insert("character_name".into(), json!(character_name));
            rolling.insert("num_dice".into(), json!(num_dice));
            rolling.insert("num_faces".into(), json!(num_faces));
            let notice = Frame::request("dice:rolling", rolling).with_table_id(seat.table_id);
            table::broadcast(state, seat.table_id, &notice, None).await;

            tokio::time::sleep(state.config.dice_roll_delay).await;

            let roll = dice::roll_and_record(
                &state.pool,
                seat.table_id,
                seat.client.user_id,
                character_name,
                num_dice,
                num_faces,
            )
            .await
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { notify: "dice:result", data: to_data(&roll) })
        }
        "list" => {
            let rolls = dice::list_rolls(&state.pool, seat.table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("rolls".into(), json!(rolls));
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown dice op: {op}"))),
    }
}

// =============================================================================
// JOURNAL HANDLERS
// =============================================================================

fn entry_input(req: &Frame) -> Result<EntryInput, Frame> {
    let character_ids = match req.data.get("character_ids").and_then(Value::as_array) {
        Some(ids) => uuid_list(ids).map_err(|bad| {
            req.error_from(&JournalError::Validation(format!("invalid character id: {bad}")))
        })?,
        None => Vec::new(),
    };
    Ok(EntryInput {
        title: req.str("title").unwrap_or_default().to_owned(),
        content: req.str("content").unwrap_or_default().to_owned(),
        character_ids,
    })
}

async fn handle_journal(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    let table_id = seat.table_id;
    let role = seat.client.role;

    match req.op() {
        "list" => {
            let entries = journal::list_entries(&state.pool, table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("entries".into(), json!(entries));
            Ok(Outcome::Reply(data))
        }
        "create" => {
            let input = entry_input(req)?;
            let entry = journal::create_entry(&state.pool, table_id, role, &input)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { notify: "journal:changed", data: to_data(&entry) })
        }
        "update" => {
            let entry_id = required_uuid(req, "entry_id")?;
            let input = entry_input(req)?;
            let entry = journal::update_entry(&state.pool, table_id, role, entry_id, &input)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast { notify: "journal:changed", data: to_data(&entry) })
        }
        "delete" => {
            let entry_id = required_uuid(req, "entry_id")?;
            journal::delete_entry(&state.pool, table_id, role, entry_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("id".into(), json!(entry_id));
            data.insert("deleted".into(), json!(true));
            Ok(Outcome::Broadcast { notify: "journal:changed", data })
        }
        op => Err(req.error(format!("unknown journal op: {op}"))),
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(state: &AppState, seat: &Seat, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        // Liveness was already refreshed on receipt.
        "ping" => Ok(Outcome::Done),
        "list" => {
            let mut data = Data::new();
            data.insert("users".into(), json!(presence::online_users(state, seat.table_id).await));
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Parse every element as a UUID string. Returns the first offending value.
fn uuid_list(values: &[Value]) -> Result<Vec<Uuid>, String> {
    values
        .iter()
        .map(|v| v.as_str().and_then(|s| s.parse().ok()).ok_or_else(|| v.to_string()))
        .collect()
}

fn required_uuid(req: &Frame, key: &str) -> Result<Uuid, Frame> {
    req.uuid(key).ok_or_else(|| req.error(format!("{key} required")))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str("code").unwrap_or("-");
        let message = frame.str("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if !is_chatty(&frame.syscall) {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
