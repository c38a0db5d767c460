//! Axum HTTP handlers.

pub mod chat;
pub mod chats;
pub mod stream;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

use crate::models::{AiState, ChatRequest, ErrorBody};
use crate::pipeline::TurnEvents;
use crate::state::AppState;
use crate::store::{is_valid_chat_id, ChatStore};

const MAX_CHAT_MESSAGE_LEN: usize = 2000;

/// All routes, with state attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/stream", post(stream::chat_stream))
        .route("/api/streams", post(stream::start_stream))
        .route("/api/stream/{stream_id}", get(stream::resume_stream))
        .route("/api/chats", get(chats::list_chats))
        .route("/api/chats/{id}", get(chats::get_chat))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Errors surfaced to HTTP clients as `{ "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Chat service unavailable")]
    Unavailable,
    /// The turn was aborted; carries the apology shown to the user.
    #[error("{0}")]
    TurnFailed(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::TurnFailed(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

/// A validated chat request.
#[derive(Debug)]
pub struct Turn {
    pub content: String,
    pub ai_state: AiState,
    pub user_id: Option<String>,
}

/// Reject malformed bodies before any external call is made.
pub fn validate_chat_request(
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Turn, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let content = req.content.as_deref().map(str::trim).unwrap_or_default();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Content is required".to_string()));
    }
    let content = truncate_to_char_boundary(content, MAX_CHAT_MESSAGE_LEN);

    let ai_state = req
        .ai_state
        .ok_or_else(|| ApiError::BadRequest("aiState is required".to_string()))?;
    if !is_valid_chat_id(&ai_state.chat_id) {
        return Err(ApiError::BadRequest("Invalid chatId".to_string()));
    }

    let user_id = req.user_id.filter(|u| !u.trim().is_empty());

    Ok(Turn {
        content,
        ai_state,
        user_id,
    })
}

async fn acquire_turn_permit(state: &AppState) -> Result<OwnedSemaphorePermit, ApiError> {
    state
        .turn_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::Unavailable)
}

/// Save the conversation when it has an owner.
fn persist_turn(chats: &ChatStore, ai_state: &AiState, user_id: Option<&str>) {
    let Some(user_id) = user_id else {
        return;
    };
    if let Err(e) = chats.save_state(ai_state, user_id) {
        tracing::warn!("Failed to save chat {}: {e:#}", ai_state.chat_id);
    }
}

/// Start a streamed turn that holds `permit` until it finishes and saves
/// its outcome on commit, even if no client is reading the stream.
fn start_streamed_turn(state: &AppState, turn: Turn, permit: OwnedSemaphorePermit) -> TurnEvents {
    let chats = Arc::clone(&state.chats);
    let user_id = turn.user_id;
    state
        .orchestrator
        .answer_stream_then(turn.ai_state, turn.content, move |outcome| {
            let _permit = permit;
            if outcome.committed {
                persist_turn(&chats, &outcome.state, user_id.as_deref());
            }
        })
}

fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, _)| *i < max_len)
        .map(|(_, c)| c)
        .collect()
}
