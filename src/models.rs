use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Non-string content (e.g. structured tool output) is read as "".
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

fn lenient_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        _ => String::new(),
    })
}

/// The ordered, append-only record of one chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiState {
    pub chat_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl AiState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            messages: Vec::new(),
        }
    }

    /// Return the state with `message` appended.
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }
}

/// A passage of legal text returned by the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    #[serde(alias = "pageContent")]
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A single message sent to the chat-completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat request body for `/api/chat`, `/api/chat/stream` and `/api/streams`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub content: Option<String>,
    pub ai_state: Option<AiState>,
    /// Owner of the chat; records are only saved when present.
    pub user_id: Option<String>,
}

/// Successful answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub ai_state: AiState,
}

/// Error body used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Returned by `POST /api/streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTicket {
    pub stream_id: Uuid,
}

/// Maximum characters of the first message kept as the chat title.
pub const TITLE_MAX_CHARS: usize = 100;

/// A persisted chat record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub path: String,
}

impl Chat {
    pub fn from_state(state: &AiState, user_id: &str, created_at: DateTime<Utc>) -> Self {
        let title = state
            .messages
            .first()
            .map(|m| m.content.chars().take(TITLE_MAX_CHARS).collect())
            .unwrap_or_default();

        Self {
            id: state.chat_id.clone(),
            title,
            user_id: user_id.to_string(),
            created_at,
            messages: state.messages.clone(),
            path: format!("/chat/{}", state.chat_id),
        }
    }
}
