//! Conversation history windowing and transcript rendering for prompts.

use crate::models::{Message, Role};

/// The last `window` messages, in original order.
pub fn truncate_history(messages: &[Message], window: usize) -> &[Message] {
    let start = messages.len().saturating_sub(window);
    &messages[start..]
}

/// Render messages as a newline-separated transcript.
///
/// User turns are prefixed with "Human: ", assistant turns with
/// "Assistant: ", any other role contributes its raw content.
pub fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!("Human: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
            Role::System | Role::Tool => m.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
