//! Retrieval-augmented question answering over the Labor Code.

pub mod history;
pub mod orchestrator;
pub mod prompts;

pub use orchestrator::{Orchestrator, PipelineSettings, TurnEvent, TurnEvents, TurnOutcome};
