use crate::handlers;
use crate::models::{
    AddVocabPayload, ChatMessage, ChatRoom, CreateRoomPayload, CreateUserPayload, ErrorResponse,
    MessageRole, PostMessagePayload, RenameRoomPayload, User, VocabEntry,
};
use crate::state::AppState;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_or_create_user,
        handlers::create_room,
        handlers::list_rooms,
        handlers::rename_room,
        handlers::delete_room,
        handlers::room_messages,
        handlers::post_message,
        handlers::list_vocab,
        handlers::add_vocab,
        handlers::delete_vocab,
    ),
    components(schemas(
        User,
        ChatRoom,
        ChatMessage,
        MessageRole,
        VocabEntry,
        CreateUserPayload,
        CreateRoomPayload,
        RenameRoomPayload,
        PostMessagePayload,
        AddVocabPayload,
        ErrorResponse,
    )),
    info(
        title = "VocabVoyage API",
        description = "Chat-driven English vocabulary tutor"
    )
)]
pub struct ApiDoc;

pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/users", post(handlers::get_or_create_user))
        .route("/rooms", post(handlers::create_room).get(handlers::list_rooms))
        .route("/rooms/{id}/name", patch(handlers::rename_room))
        .route("/rooms/{id}", delete(handlers::delete_room))
        .route(
            "/rooms/{id}/messages",
            get(handlers::room_messages).post(handlers::post_message),
        )
        .route("/vocabulary", get(handlers::list_vocab).post(handlers::add_vocab))
        .route("/vocabulary/{word}", delete(handlers::delete_vocab))
        .with_state(state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
}
