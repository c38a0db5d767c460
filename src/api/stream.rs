//! SSE transports for streamed turns.
//!
//! Framing, per turn:
//!
//! ```text
//!   data: <token>            (zero or more)
//!   event: state / data: <aiState JSON>      on commit
//!   event: error / data: <apology>           on abort or idle timeout
//!   event: end   / data: Stream ended
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use uuid::Uuid;

use crate::api::{acquire_turn_permit, start_streamed_turn, validate_chat_request, ApiError};
use crate::models::{ChatRequest, StreamTicket};
use crate::pipeline::{TurnEvent, TurnEvents, TurnOutcome};
use crate::state::AppState;

/// Longest allowed gap between answer deltas once the answer has started.
/// The rewrite and retrieval stages before the first delta are bounded by
/// the LLM client timeouts instead.
const IDLE_TIMEOUT_SECS: u64 = 30;

/// POST /api/chat/stream: run a turn and stream it on this response.
pub async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let turn = validate_chat_request(payload)?;
    let permit = acquire_turn_permit(&state).await?;

    let events = start_streamed_turn(&state, turn, permit);
    Ok(turn_sse(events, apology(&state)))
}

/// POST /api/streams: start a turn and hand back a ticket for its stream.
pub async fn start_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<StreamTicket>, ApiError> {
    let turn = validate_chat_request(payload)?;
    let permit = acquire_turn_permit(&state).await?;

    let events = start_streamed_turn(&state, turn, permit);
    let stream_id = state.streams.register(events);
    tracing::debug!("Registered stream {stream_id}");

    Ok(Json(StreamTicket { stream_id }))
}

/// GET /api/stream/{stream_id}: consume a stream started by `start_stream`.
pub async fn resume_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let pending = state
        .streams
        .claim(&stream_id)
        .ok_or_else(|| ApiError::NotFound(format!("Stream {stream_id} not found")))?;

    Ok(turn_sse(pending.events, apology(&state)))
}

fn apology(state: &AppState) -> String {
    state.orchestrator.settings().apology.clone()
}

enum Phase {
    /// Rewrite and retrieval running; no delta yet.
    Preparing,
    Answering,
    Closing,
    Finished,
}

struct SseState {
    events: TurnEvents,
    apology: String,
    phase: Phase,
}

/// Map turn events to SSE frames, with an idle timeout between deltas.
///
/// The transport only frames events; the turn holds its own permit and
/// saves its own outcome, so dropping this stream loses nothing.
fn turn_sse(
    events: TurnEvents,
    apology: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let idle_timeout = Duration::from_secs(IDLE_TIMEOUT_SECS);
    let initial = SseState {
        events,
        apology,
        phase: Phase::Preparing,
    };

    let event_stream = stream::unfold(initial, move |mut st| async move {
        let next = match st.phase {
            Phase::Finished => return None,
            Phase::Closing => {
                st.phase = Phase::Finished;
                return Some((Ok(Event::default().event("end").data("Stream ended")), st));
            }
            Phase::Preparing => Ok(st.events.next().await),
            Phase::Answering => tokio::time::timeout(idle_timeout, st.events.next()).await,
        };

        let event = match next {
            Ok(Some(TurnEvent::Delta(token))) => {
                st.phase = Phase::Answering;
                Event::default().data(sse_safe(&token))
            }
            Ok(Some(TurnEvent::Done(outcome))) => {
                st.phase = Phase::Closing;
                finish_event(outcome, &st.apology)
            }
            Ok(None) => {
                tracing::error!("Turn stream closed without an outcome");
                st.phase = Phase::Closing;
                error_event(&st.apology)
            }
            Err(_) => {
                tracing::warn!("No answer delta for {IDLE_TIMEOUT_SECS}s, closing stream");
                st.phase = Phase::Closing;
                error_event(&st.apology)
            }
        };
        Some((Ok(event), st))
    });

    Sse::new(event_stream)
}

fn finish_event(outcome: TurnOutcome, apology: &str) -> Event {
    if !outcome.committed {
        return error_event(&outcome.reply);
    }
    match Event::default().event("state").json_data(&outcome.state) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Failed to encode chat state: {e}");
            error_event(apology)
        }
    }
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(sse_safe(message))
}

/// SSE field values may not carry carriage returns; newlines become extra
/// `data:` lines.
fn sse_safe(text: &str) -> String {
    text.replace('\r', "")
}
