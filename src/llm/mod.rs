//! Chat-completion and embedding clients for OpenAI-compatible and Ollama APIs.

pub mod chat_stream;
pub mod completion;
pub mod embeddings;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::LlmConfig;
use crate::models::ChatMessage;

pub use chat_stream::ChatStream;

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the full completion for `messages`.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// Return the completion as a stream of text deltas. The stream ends when
    /// the provider signals completion.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<ChatStream>;
}

/// [`ChatModel`] backed by the configured HTTP provider.
#[derive(Clone)]
pub struct HttpChatModel {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpChatModel {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        completion::complete_chat(&self.client, &self.config, messages).await
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        chat_stream::stream_chat(&self.client, &self.config, messages).await
    }
}

/// POST `body` as JSON to a provider endpoint and decode the JSON reply.
///
/// Applies the per-call timeout and, when configured, the bearer key.
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    config: &LlmConfig,
    url: &str,
    body: &B,
    api: &str,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut req = client
        .post(url)
        .timeout(Duration::from_secs(config.timeout_secs))
        .json(body);
    if let Some(key) = config.api_key.as_deref() {
        req = req.bearer_auth(key);
    }

    let resp = req
        .send()
        .await
        .with_context(|| format!("Failed to call {api}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{api} returned {status}: {body}");
    }

    resp.json()
        .await
        .with_context(|| format!("Failed to parse {api} response"))
}
