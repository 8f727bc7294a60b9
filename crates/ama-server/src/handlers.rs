//! HTTP handlers. Writes that change a room broadcast to its subscribers
//! after the store has accepted them.

use std::net::SocketAddr;

use axum::extract::rejection::{ExtensionRejection, JsonRejection};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ama_core::{Envelope, MessageId, RoomId};
use ama_store::{MessageRow, RoomRow};

use crate::error::ApiError;
use crate::server::AppState;
use crate::websocket::{run_room_session, ClientId};

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub theme: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub rooms: usize,
    pub subscribers: usize,
}

/// Parse a room id and make sure the room exists.
fn validate_room(state: &AppState, raw_room_id: &str) -> Result<RoomId, ApiError> {
    let room_id = RoomId::parse(raw_room_id).map_err(|_| ApiError::InvalidRoomId)?;
    let _ = state
        .rooms
        .find(&room_id)
        .map_err(ApiError::from_room_lookup)?;
    Ok(room_id)
}

fn parse_message_id(raw: &str) -> Result<MessageId, ApiError> {
    MessageId::parse(raw).map_err(|_| ApiError::InvalidMessageId)
}

/// GET /subscribe/{room_id}
///
/// The room is validated before the upgrade is looked at, so a bad or
/// unknown room never reaches the registry.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let room_id = match validate_room(&state, &raw_room_id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    if !state.registry.has_capacity(&room_id) {
        warn!(room_id = %room_id, "room at subscriber capacity, refusing subscribe");
        return ApiError::RoomFull.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(room_id = %room_id, error = %rejection, "failed to upgrade connection");
            return rejection.into_response();
        }
    };

    let remote_addr = connect_info.ok().map(|ConnectInfo(addr)| addr);
    let registry = state.registry.clone();
    let config = state.session;

    ws.on_failed_upgrade(move |e| {
        warn!(room_id = %room_id, error = %e, "websocket handshake failed");
    })
    .on_upgrade(move |socket| async move {
        let _ = run_room_session(socket, room_id, ClientId::new(), remote_addr, registry, config).await;
    })
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::InvalidBody)?;
    let id = state.rooms.save(&body.theme)?;
    info!(room_id = %id, "room created");
    Ok(Json(IdResponse { id: id.to_string() }))
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<RoomRow>>, ApiError> {
    Ok(Json(state.rooms.list()?))
}

/// POST /api/rooms/{room_id}/messages
pub async fn create_message(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    let Json(body) = body.map_err(|_| ApiError::InvalidBody)?;

    let id = state.messages.save(&room_id, &body.message)?;
    state
        .broadcaster
        .spawn_notify(Envelope::message_created(room_id, id, body.message));

    Ok(Json(IdResponse { id: id.to_string() }))
}

/// GET /api/rooms/{room_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<Vec<MessageRow>>, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    Ok(Json(state.messages.list_for_room(&room_id)?))
}

/// GET /api/rooms/{room_id}/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<MessageRow>, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    let row = state
        .messages
        .find(&room_id, &message_id)
        .map_err(ApiError::from_message_lookup)?;
    Ok(Json(row))
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/react
///
/// Each broadcast runs on its own task, so concurrent reactions can reach a
/// subscriber out of order. The envelope carries the absolute count; clients
/// needing a converged value re-read the message.
pub async fn react_to_message(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    let count = state
        .messages
        .react(&room_id, &message_id)
        .map_err(ApiError::from_message_lookup)?;

    state
        .broadcaster
        .spawn_notify(Envelope::reaction_increased(room_id, message_id, count));
    Ok(Json(CountResponse { count }))
}

/// DELETE /api/rooms/{room_id}/messages/{message_id}/react
pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    let count = state
        .messages
        .remove_reaction(&room_id, &message_id)
        .map_err(ApiError::from_message_lookup)?;

    state
        .broadcaster
        .spawn_notify(Envelope::reaction_decreased(room_id, message_id, count));
    Ok(Json(CountResponse { count }))
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/answer
pub async fn mark_answered(
    State(state): State<AppState>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room_id = validate_room(&state, &raw_room_id)?;
    let message_id = parse_message_id(&raw_message_id)?;
    state
        .messages
        .mark_answered(&room_id, &message_id)
        .map_err(ApiError::from_message_lookup)?;

    state
        .broadcaster
        .spawn_notify(Envelope::answered(room_id, message_id));
    Ok(StatusCode::OK)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        rooms: state.registry.room_count(),
        subscribers: state.registry.total_subscribers(),
    })
}
