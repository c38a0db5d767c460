use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::models::ChatMessage;

use super::post_json;

/// Run a single non-streaming chat completion and return the generated text.
pub async fn complete_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let content = match config.provider.as_str() {
        "ollama" => call_ollama(client, config, messages).await?,
        "openai" => call_openai(client, config, messages).await?,
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    };

    let content = content.trim().to_string();
    if content.is_empty() {
        anyhow::bail!("LLM returned an empty completion");
    }
    Ok(content)
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
pub(crate) struct OllamaOptions {
    pub(crate) temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

async fn call_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);
    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages,
        stream: false,
        options: OllamaOptions {
            temperature: config.temperature,
        },
    };

    let body: OllamaChatResponse = post_json(client, config, &url, &req, "Ollama chat API").await?;
    Ok(body.message.content)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

async fn call_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let req = OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages,
        temperature: config.temperature,
    };

    let body: OpenAiChatResponse = post_json(client, config, &url, &req, "OpenAI chat API").await?;
    Ok(first_choice_content(body))
}

fn first_choice_content(body: OpenAiChatResponse) -> String {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_first_choice() {
        let body: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Conform art. 145"}},{"message":{"content":"ignored"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice_content(body), "Conform art. 145");
    }

    #[test]
    fn test_openai_response_null_content() {
        let body: OpenAiChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(first_choice_content(body), "");
    }

    #[test]
    fn test_openai_response_no_choices() {
        let body: OpenAiChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(first_choice_content(body), "");
    }

    #[test]
    fn test_openai_request_shape() {
        let req = OpenAiChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::user("salut")],
            temperature: 0.3,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_error() {
        let config = LlmConfig {
            provider: "bogus".into(),
            ..LlmConfig::default()
        };
        let err = complete_chat(&reqwest::Client::new(), &config, vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
