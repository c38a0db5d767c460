//! The question-answering turn.
//!
//! A turn always runs the same stages in order:
//!
//! ```text
//!   append user turn
//!         │
//!         ▼
//!   rewrite ── LLM call #1: history + latest message → standalone question
//!         │        (failure after retries: abort with apology)
//!         ▼
//!   retrieve ── vector search for the standalone question, top-k
//!         │        (failure after retries: continue with no passages)
//!         ▼
//!   compose ── passages → context block
//!         │
//!         ▼
//!   answer ── LLM call #2: context + history + standalone question
//!         │        (failure after retries: abort with apology)
//!         ▼
//!   commit ── append assistant turn, hand back the new state
//! ```
//!
//! State is threaded through by value. An aborted turn returns the state with
//! the user turn appended and no assistant turn.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::Config;
use crate::llm::ChatModel;
use crate::models::{AiState, ChatMessage, Message, Passage};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::search::Retriever;

use super::history::{serialize_history, truncate_history};
use super::prompts::{format_passages, sanitize_for_prompt, ANSWER, STANDALONE_QUESTION};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub history_window: usize,
    pub top_k: usize,
    pub retry: RetryPolicy,
    pub apology: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_window: config.pipeline.history_window,
            top_k: config.retriever.top_k,
            retry: config.retry,
            apology: config.pipeline.apology.clone(),
        }
    }
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Conversation state after the turn.
    pub state: AiState,
    /// The answer, or the apology when the turn was aborted.
    pub reply: String,
    /// Whether an assistant message was appended to `state`.
    pub committed: bool,
    /// The rewritten question; `None` when the rewrite stage failed.
    pub standalone_question: Option<String>,
    /// Passages the answer was conditioned on.
    pub passages: Vec<Passage>,
}

/// Events of a streamed turn: zero or more deltas, then exactly one `Done`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Delta(String),
    Done(TurnOutcome),
}

/// Unbounded so a turn nobody is reading yet never stalls its producer.
pub type TurnEvents = UnboundedReceiverStream<TurnEvent>;

/// Everything computed before the answer call.
struct PreparedTurn {
    standalone_question: String,
    passages: Vec<Passage>,
    answer_prompt: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    settings: Arc<PipelineSettings>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            model,
            retriever,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run a full turn and return the answer in one piece.
    pub async fn answer(&self, state: AiState, content: &str) -> TurnOutcome {
        let started = Instant::now();
        let state = begin_turn(state, content);

        let prepared = match self.prepare(&state, content).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Chat {}: rewrite stage failed: {e:#}", state.chat_id);
                return self.abort(state, None, Vec::new());
            }
        };

        let prompt = prepared.answer_prompt.clone();
        let result = retry_with_backoff(&self.settings.retry, "answer", || {
            self.model.complete(vec![ChatMessage::user(prompt.clone())])
        })
        .await;

        match result {
            Ok(answer) => {
                tracing::info!(
                    "Chat {}: turn answered in {}ms",
                    state.chat_id,
                    started.elapsed().as_millis()
                );
                commit(state, prepared, answer)
            }
            Err(e) => {
                tracing::error!("Chat {}: answer stage failed: {e:#}", state.chat_id);
                self.abort(state, Some(prepared.standalone_question), prepared.passages)
            }
        }
    }

    /// Run a turn on a background task, streaming answer deltas as they arrive.
    ///
    /// The stream ends with a single [`TurnEvent::Done`]. Dropping the stream
    /// does not cancel the turn.
    pub fn answer_stream(&self, state: AiState, content: String) -> TurnEvents {
        self.answer_stream_then(state, content, |_| {})
    }

    /// Like [`Orchestrator::answer_stream`], but `on_done` runs on the
    /// producing task with the outcome before `Done` is sent, whether or not
    /// the stream is still being read.
    pub fn answer_stream_then<F>(&self, state: AiState, content: String, on_done: F) -> TurnEvents
    where
        F: FnOnce(&TurnOutcome) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.run_streaming_turn(state, &content, &tx).await;
            on_done(&outcome);
            if tx.send(TurnEvent::Done(outcome)).is_err() {
                tracing::debug!("Turn finished after its consumer went away");
            }
        });
        UnboundedReceiverStream::new(rx)
    }

    async fn run_streaming_turn(
        &self,
        state: AiState,
        content: &str,
        tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> TurnOutcome {
        let state = begin_turn(state, content);

        let prepared = match self.prepare(&state, content).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Chat {}: rewrite stage failed: {e:#}", state.chat_id);
                return self.abort(state, None, Vec::new());
            }
        };

        let prompt = prepared.answer_prompt.clone();
        let stream = retry_with_backoff(&self.settings.retry, "answer stream", || {
            self.model.stream(vec![ChatMessage::user(prompt.clone())])
        })
        .await;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Chat {}: answer stage failed: {e:#}", state.chat_id);
                return self.abort(state, Some(prepared.standalone_question), prepared.passages);
            }
        };

        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(delta) => {
                    answer.push_str(&delta);
                    // A closed channel means the client left; keep going so the
                    // turn still completes.
                    let _ = tx.send(TurnEvent::Delta(delta));
                }
                Err(e) => {
                    tracing::error!(
                        "Chat {}: answer stream broke after {} bytes: {e:#}",
                        state.chat_id,
                        answer.len()
                    );
                    return self.abort(state, Some(prepared.standalone_question), prepared.passages);
                }
            }
        }

        if answer.trim().is_empty() {
            tracing::error!("Chat {}: answer stream produced no text", state.chat_id);
            return self.abort(state, Some(prepared.standalone_question), prepared.passages);
        }

        commit(state, prepared, answer)
    }

    /// Rewrite, retrieve and compose. Only a rewrite failure is an error.
    async fn prepare(&self, state: &AiState, content: &str) -> Result<PreparedTurn> {
        // History excludes the user turn just appended.
        let prior = &state.messages[..state.messages.len().saturating_sub(1)];
        let history = serialize_history(truncate_history(prior, self.settings.history_window));
        let history = sanitize_for_prompt(&history);
        let question = sanitize_for_prompt(content);

        // ── Rewrite ──────────────────────────────────────────
        let rewrite_prompt = STANDALONE_QUESTION
            .render(&[("chatHistory", history.as_str()), ("question", question.as_str())])?;
        let started = Instant::now();
        let rewritten = retry_with_backoff(&self.settings.retry, "standalone question", || {
            self.model.complete(vec![ChatMessage::user(rewrite_prompt.clone())])
        })
        .await?;

        let standalone_question = match rewritten.trim() {
            "" => {
                tracing::warn!("Empty standalone question; using the message as-is");
                question.clone()
            }
            q => q.to_string(),
        };
        tracing::info!(
            "Standalone question ({}ms): {standalone_question}",
            started.elapsed().as_millis()
        );

        // ── Retrieve ─────────────────────────────────────────
        let k = self.settings.top_k;
        let started = Instant::now();
        let retrieved = retry_with_backoff(&self.settings.retry, "retrieval", || {
            self.retriever.retrieve(&standalone_question, k)
        })
        .await;
        let passages: Vec<Passage> = match retrieved {
            Ok(passages) => passages.into_iter().take(k).collect(),
            Err(e) => {
                tracing::warn!("Retrieval failed, answering without context: {e:#}");
                Vec::new()
            }
        };
        tracing::info!(
            "Retrieved {} passages in {}ms",
            passages.len(),
            started.elapsed().as_millis()
        );

        // ── Compose ──────────────────────────────────────────
        let context = format_passages(&passages);
        let answer_prompt = ANSWER.render(&[
            ("retrievedContext", context.as_str()),
            ("chatHistory", history.as_str()),
            ("question", standalone_question.as_str()),
        ])?;

        Ok(PreparedTurn {
            standalone_question,
            passages,
            answer_prompt,
        })
    }

    fn abort(
        &self,
        state: AiState,
        standalone_question: Option<String>,
        passages: Vec<Passage>,
    ) -> TurnOutcome {
        TurnOutcome {
            state,
            reply: self.settings.apology.clone(),
            committed: false,
            standalone_question,
            passages,
        }
    }
}

fn begin_turn(state: AiState, content: &str) -> AiState {
    state.with_message(Message::user(content))
}

fn commit(state: AiState, prepared: PreparedTurn, answer: String) -> TurnOutcome {
    let answer = answer.trim().to_string();
    TurnOutcome {
        state: state.with_message(Message::assistant(answer.clone())),
        reply: answer,
        committed: true,
        standalone_question: Some(prepared.standalone_question),
        passages: prepared.passages,
    }
}
