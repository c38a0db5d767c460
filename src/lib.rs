//! # labor-code-chat
//!
//! A retrieval-augmented chat service answering questions about the Romanian
//! Labor Code (Codul Muncii), with answers grounded in passages of the code
//! and related court decisions.
//!
//! ## Architecture
//!
//! Every user message runs one turn of a fixed pipeline:
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │ user message + chat state │
//!                  └────────────┬─────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Rewrite (LLM call #1)   │
//!                  │  history + message →     │
//!                  │  standalone question     │
//!                  └────────────┬─────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Retrieve (top-k = 5)    │
//!                  │  embed + vector search   │
//!                  └────────────┬─────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Compose context block   │
//!                  └────────────┬─────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Answer (LLM call #2)    │
//!                  │  whole or streamed       │
//!                  └────────────┬─────────────┘
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Commit assistant turn   │
//!                  │  + save chat if owned    │
//!                  └──────────────────────────┘
//! ```
//!
//! Each external call is wrapped in exponential-backoff retry. A failed
//! rewrite or answer aborts the turn with a fixed apology; a failed retrieval
//! degrades to an empty context.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, LLM, retriever and retry
//! - [`models`] - Conversation state, messages, passages and request/response types
//! - [`retry`] - Exponential-backoff retry used by every external call
//! - [`pipeline`] - Prompts, history windowing and the turn orchestrator
//! - [`llm`] - Chat completion, streaming and embeddings via Ollama or OpenAI-compatible APIs
//! - [`search`] - The `Retriever` seam with Supabase and local vector-store backends
//! - [`chunking`] - Recursive character splitting for ingesting the Labor Code
//! - [`store`] - JSON-file persistence of finished chats
//! - [`streams`] - Hand-off of in-flight turn streams between requests
//! - [`api`] - Axum HTTP handlers, JSON and SSE
//! - [`state`] - Shared application state

pub mod api;
pub mod chunking;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod state;
pub mod store;
pub mod streams;
