use crate::db::DuplicateWord;
use crate::models::{
    AddVocabPayload, ChatMessage, ChatRoom, CreateRoomPayload, CreateUserPayload, ErrorResponse,
    MessageRole, PostMessagePayload, RenameRoomPayload, User, VocabEntry,
};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;
use vocab_core::{prompts, ConversationState, Message, Role};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalServerError(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError::InternalServerError(err.into())
    }
}

/// Extracts the caller's id from the `x-user-id` header.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing x-user-id header".to_string()))?;
    raw.parse::<Uuid>()
        .map_err(|_| ApiError::BadRequest("x-user-id header is not a valid UUID".to_string()))
}

/// Loads a room and checks that the caller owns it.
async fn owned_room(state: &AppState, room_id: Uuid, user_id: Uuid) -> Result<ChatRoom, ApiError> {
    let room = state
        .db
        .get_room(room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat room not found".to_string()))?;
    if room.user_id != user_id {
        // Hide other users' rooms instead of acknowledging them.
        return Err(ApiError::NotFound("Chat room not found".to_string()));
    }
    Ok(room)
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserPayload,
    responses(
        (status = 200, description = "Existing or newly created user", body = User),
        (status = 400, description = "Invalid username", body = ErrorResponse)
    )
)]
pub async fn get_or_create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserPayload>,
) -> Result<Json<User>, ApiError> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username must not be empty".to_string()));
    }
    let user = state.db.get_or_create_user(username).await?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/rooms",
    request_body = CreateRoomPayload,
    params(("x-user-id" = String, Header, description = "Caller's user id")),
    responses(
        (status = 201, description = "Chat room created", body = ChatRoom),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<(StatusCode, Json<ChatRoom>), ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Room name must not be empty".to_string()));
    }
    let room = state.db.create_room(user_id, name).await?;
    info!(room_id = %room.id, "Created chat room");
    Ok((StatusCode::CREATED, Json(room)))
}

#[utoipa::path(
    get,
    path = "/rooms",
    params(("x-user-id" = String, Header, description = "Caller's user id")),
    responses(
        (status = 200, description = "The caller's chat rooms", body = [ChatRoom])
    )
)]
pub async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatRoom>>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let rooms = state.db.list_rooms(user_id).await?;
    Ok(Json(rooms))
}

#[utoipa::path(
    patch,
    path = "/rooms/{id}/name",
    request_body = RenameRoomPayload,
    params(
        ("id" = String, Path, description = "Chat room id"),
        ("x-user-id" = String, Header, description = "Caller's user id")
    ),
    responses(
        (status = 200, description = "Room renamed", body = ChatRoom),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
pub async fn rename_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<RenameRoomPayload>,
) -> Result<Json<ChatRoom>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Room name must not be empty".to_string()));
    }
    let mut room = owned_room(&state, room_id, user_id).await?;
    state.db.rename_room(room_id, name).await?;
    room.name = name.to_string();
    Ok(Json(room))
}

#[utoipa::path(
    delete,
    path = "/rooms/{id}",
    params(
        ("id" = String, Path, description = "Chat room id"),
        ("x-user-id" = String, Header, description = "Caller's user id")
    ),
    responses(
        (status = 204, description = "Room deleted"),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
pub async fn delete_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    owned_room(&state, room_id, user_id).await?;
    state.db.delete_room(room_id).await?;
    state.forget_turn_lock(room_id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/rooms/{id}/messages",
    params(
        ("id" = String, Path, description = "Chat room id"),
        ("x-user-id" = String, Header, description = "Caller's user id")
    ),
    responses(
        (status = 200, description = "Messages in chronological order", body = [ChatMessage]),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
pub async fn room_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    owned_room(&state, room_id, user_id).await?;
    let messages = state.db.room_messages(room_id).await?;
    Ok(Json(messages))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/messages",
    request_body = PostMessagePayload,
    params(
        ("id" = String, Path, description = "Chat room id"),
        ("x-user-id" = String, Header, description = "Caller's user id")
    ),
    responses(
        (status = 201, description = "The assistant's reply", body = ChatMessage),
        (status = 404, description = "Room not found", body = ErrorResponse)
    )
)]
pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<PostMessagePayload>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    owned_room(&state, room_id, user_id).await?;

    // One chat turn at a time per room.
    let lock = state.turn_lock(room_id);
    let _guard = lock.lock().await;

    let history = state
        .db
        .recent_history(room_id, state.config.max_history_messages)
        .await?;
    let prior: Vec<Message> = history
        .iter()
        .map(|m| match m.role {
            MessageRole::User => Message::user(m.content.clone()),
            MessageRole::Assistant => Message {
                role: Role::Assistant,
                content: m.content.clone(),
                origin: m.origin.clone(),
            },
        })
        .collect();
    let conversation = ConversationState::from_history(user_id.to_string(), prior);

    let deadline = Duration::from_secs(state.config.turn_timeout_secs);
    let turn = tokio::time::timeout(
        deadline,
        state.workflow.process_turn(&conversation, content),
    )
    .await;

    let (next, reply) = match turn {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(%room_id, "Chat turn failed: {err}");
            return Ok((
                StatusCode::CREATED,
                Json(failure_reply(room_id)),
            ));
        }
        Err(_) => {
            warn!(%room_id, "Chat turn exceeded the {}s deadline", deadline.as_secs());
            return Ok((
                StatusCode::CREATED,
                Json(failure_reply(room_id)),
            ));
        }
    };

    let origin = next
        .messages()
        .last()
        .and_then(|m| m.origin.as_deref())
        .map(str::to_string);

    state
        .db
        .add_room_message(room_id, MessageRole::User, content, None)
        .await?;
    let stored = state
        .db
        .add_room_message(room_id, MessageRole::Assistant, &reply, origin.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(stored)))
}

/// A synthetic, unpersisted reply for turns that could not complete.
fn failure_reply(room_id: Uuid) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4(),
        room_id,
        role: MessageRole::Assistant,
        content: prompts::TURN_FAILURE.to_string(),
        origin: None,
        created_at: chrono::Utc::now(),
    }
}

#[utoipa::path(
    get,
    path = "/vocabulary",
    params(("x-user-id" = String, Header, description = "Caller's user id")),
    responses(
        (status = 200, description = "The caller's notebook, sorted by word", body = [VocabEntry])
    )
)]
pub async fn list_vocab(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<VocabEntry>>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let entries = state.db.list_vocab(user_id).await?;
    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/vocabulary",
    request_body = AddVocabPayload,
    params(("x-user-id" = String, Header, description = "Caller's user id")),
    responses(
        (status = 201, description = "Entry added", body = VocabEntry),
        (status = 409, description = "Word already in the notebook", body = ErrorResponse)
    )
)]
pub async fn add_vocab(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddVocabPayload>,
) -> Result<(StatusCode, Json<VocabEntry>), ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let word = payload.word.trim();
    if word.is_empty() {
        return Err(ApiError::BadRequest("Word must not be empty".to_string()));
    }
    let entry = state
        .db
        .add_vocab_entry(
            user_id,
            word,
            payload.definition.trim(),
            &payload.examples,
            payload.notes.as_deref(),
        )
        .await
        .map_err(|err| match err.downcast::<DuplicateWord>() {
            Ok(dup) => ApiError::Conflict(dup.to_string()),
            Err(other) => ApiError::InternalServerError(other),
        })?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[utoipa::path(
    delete,
    path = "/vocabulary/{word}",
    params(
        ("word" = String, Path, description = "Word to remove"),
        ("x-user-id" = String, Header, description = "Caller's user id")
    ),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 404, description = "Word not in the notebook", body = ErrorResponse)
    )
)]
pub async fn delete_vocab(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(word): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let removed = state.db.delete_vocab(user_id, &word).await?;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "'{word}' is not in the notebook"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}
