use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::ApiError;
use crate::models::Chat;
use crate::state::AppState;
use crate::store::is_valid_chat_id;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChatsQuery {
    pub user_id: String,
}

/// GET /api/chats/{id}
pub async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Chat>, ApiError> {
    if !is_valid_chat_id(&id) {
        return Err(ApiError::BadRequest("Invalid chat id".to_string()));
    }
    state
        .chats
        .load(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Chat {id} not found")))
}

/// GET /api/chats?userId=...: a user's chats, newest first.
pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("userId is required".to_string()));
    }
    Ok(Json(state.chats.list_for_user(user_id)?))
}
