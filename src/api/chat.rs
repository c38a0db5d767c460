use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::{acquire_turn_permit, persist_turn, validate_chat_request, ApiError};
use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// POST /api/chat: run one turn and return the whole answer.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    // ── Step 1: Validate input ────────────────────────────
    let turn = validate_chat_request(payload)?;

    // ── Step 2: Acquire semaphore ─────────────────────────
    let _permit = acquire_turn_permit(&state).await?;

    // ── Step 3: Run the turn ──────────────────────────────
    let outcome = state
        .orchestrator
        .answer(turn.ai_state, &turn.content)
        .await;
    if !outcome.committed {
        return Err(ApiError::TurnFailed(outcome.reply));
    }

    // ── Step 4: Persist ───────────────────────────────────
    persist_turn(&state.chats, &outcome.state, turn.user_id.as_deref());

    Ok(Json(ChatResponse {
        answer: outcome.reply,
        ai_state: outcome.state,
    }))
}
