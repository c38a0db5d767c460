use anyhow::{Context, Result};
use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::ChatMessage;

use super::completion::OllamaOptions;

/// Upper bound on a whole streamed response.
const STREAM_TIMEOUT_SECS: u64 = 300;

/// Stream of answer deltas; ends at the provider's completion signal.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream a chat completion from Ollama or an OpenAI-compatible API.
///
/// Yields one content delta per provider chunk. Empty and role-only chunks
/// are skipped; the stream stops at `done: true` / `data: [DONE]`.
pub async fn stream_chat(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
) -> Result<ChatStream> {
    let dialect = Dialect::for_provider(&config.provider)?;
    let req = StreamRequest::new(dialect, config, messages);

    let mut builder = client
        .post(dialect.endpoint(&config.base_url))
        .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS.max(config.timeout_secs)))
        .json(&req);
    if let (Dialect::OpenAi, Some(key)) = (dialect, config.api_key.as_deref()) {
        builder = builder.bearer_auth(key);
    }

    let resp = builder
        .send()
        .await
        .with_context(|| format!("Failed to connect to {} for chat streaming", dialect.name()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{} chat API returned {status}: {body}", dialect.name());
    }

    Ok(Box::pin(deltas(stream_lines(resp.bytes_stream()), dialect)))
}

// ─── Wire formats ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    /// Newline-delimited JSON from `/api/chat`.
    Ollama,
    /// `data:`-prefixed SSE from `/v1/chat/completions`.
    OpenAi,
}

/// One parsed line of a provider stream.
#[derive(Debug, PartialEq)]
enum Frame {
    Delta(String),
    Skip,
    Finished,
}

impl Dialect {
    fn for_provider(provider: &str) -> Result<Self> {
        match provider {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => anyhow::bail!("Unsupported LLM provider for chat: {other}"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAi => "OpenAI",
        }
    }

    fn endpoint(self, base_url: &str) -> String {
        match self {
            Self::Ollama => format!("{base_url}/api/chat"),
            Self::OpenAi => format!("{base_url}/v1/chat/completions"),
        }
    }

    fn parse_line(self, line: &str) -> Result<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Frame::Skip);
        }
        match self {
            Self::Ollama => parse_ollama_line(line),
            Self::OpenAi => parse_openai_line(line),
        }
    }
}

#[derive(Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

impl StreamRequest {
    fn new(dialect: Dialect, config: &LlmConfig, messages: Vec<ChatMessage>) -> Self {
        let (temperature, options) = match dialect {
            Dialect::Ollama => (
                None,
                Some(OllamaOptions {
                    temperature: config.temperature,
                }),
            ),
            Dialect::OpenAi => (Some(config.temperature), None),
        };
        Self {
            model: config.chat_model.clone(),
            messages,
            stream: true,
            temperature,
            options,
        }
    }
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

fn parse_ollama_line(line: &str) -> Result<Frame> {
    let chunk: OllamaStreamChunk =
        serde_json::from_str(line).context("Failed to parse Ollama chunk")?;
    if chunk.done {
        return Ok(Frame::Finished);
    }
    Ok(match chunk.message.map(|m| m.content) {
        Some(content) if !content.is_empty() => Frame::Delta(content),
        _ => Frame::Skip,
    })
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

fn parse_openai_line(line: &str) -> Result<Frame> {
    // Comments, `event:` and other SSE fields carry no content
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Frame::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Finished);
    }

    let chunk: OpenAiStreamChunk =
        serde_json::from_str(data).context("Failed to parse OpenAI chunk")?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map_or(Frame::Skip, Frame::Delta))
}

/// Turn raw lines into content deltas, stopping at the completion frame.
fn deltas(
    lines: impl Stream<Item = Result<String>> + Send + 'static,
    dialect: Dialect,
) -> impl Stream<Item = Result<String>> + Send {
    lines
        .map(move |line| line.and_then(|l| dialect.parse_line(&l)))
        .take_while(|frame| future::ready(!matches!(frame, Ok(Frame::Finished))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Frame::Delta(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
}

// ─── Line buffering ──────────────────────────────────────

/// Split a byte stream into non-blank lines.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode intact.
fn stream_lines<S>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    let reader = LineReader {
        inner: Box::pin(byte_stream),
        buffer: Vec::new(),
        exhausted: false,
    };
    stream::unfold(reader, |mut reader| async move {
        let line = reader.next_line().await?;
        Some((line, reader))
    })
}

struct LineReader<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl<S> LineReader<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>>,
{
    async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos]);
                let line = line.trim_end_matches('\r');
                if line.trim().is_empty() {
                    continue;
                }
                return Some(Ok(line.to_string()));
            }

            if self.exhausted {
                // Final line without a trailing newline
                let rest = std::mem::take(&mut self.buffer);
                let rest = String::from_utf8_lossy(&rest);
                if rest.trim().is_empty() {
                    return None;
                }
                return Some(Ok(rest.into_owned()));
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Some(Err(anyhow::anyhow!("Stream read error: {e}"))),
                None => self.exhausted = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(frame: Result<Frame>) -> Option<String> {
        match frame.unwrap() {
            Frame::Delta(text) => Some(text),
            _ => None,
        }
    }

    // ─── Ollama ──────────────────────────────────────────

    #[test]
    fn test_ollama_content_chunk() {
        let line = r#"{"message":{"role":"assistant","content":"Conform"},"done":false}"#;
        assert_eq!(delta(Dialect::Ollama.parse_line(line)).as_deref(), Some("Conform"));
    }

    #[test]
    fn test_ollama_done_finishes() {
        let line = r#"{"done":true,"total_duration":123}"#;
        assert_eq!(Dialect::Ollama.parse_line(line).unwrap(), Frame::Finished);
    }

    #[test]
    fn test_ollama_empty_content_skipped() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":false}"#;
        assert_eq!(Dialect::Ollama.parse_line(line).unwrap(), Frame::Skip);
    }

    #[test]
    fn test_ollama_malformed() {
        assert!(Dialect::Ollama.parse_line("not valid json{{{").is_err());
    }

    // ─── OpenAI ──────────────────────────────────────────

    #[test]
    fn test_openai_content_chunk() {
        let line = r#"data: {"choices":[{"delta":{"content":"Articolul"}}]}"#;
        assert_eq!(delta(Dialect::OpenAi.parse_line(line)).as_deref(), Some("Articolul"));
    }

    #[test]
    fn test_openai_done_finishes() {
        assert_eq!(Dialect::OpenAi.parse_line("data: [DONE]").unwrap(), Frame::Finished);
    }

    #[test]
    fn test_openai_role_only_and_null_chunks_skipped() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        let null = r#"data: {"choices":[{"delta":{"content":null}}]}"#;
        let no_choices = r#"data: {"choices":[]}"#;
        for line in [role_only, null, no_choices] {
            assert_eq!(Dialect::OpenAi.parse_line(line).unwrap(), Frame::Skip);
        }
    }

    #[test]
    fn test_openai_non_data_lines_skipped() {
        assert_eq!(Dialect::OpenAi.parse_line("event: message").unwrap(), Frame::Skip);
        assert_eq!(Dialect::OpenAi.parse_line(": keep-alive").unwrap(), Frame::Skip);
    }

    #[test]
    fn test_openai_malformed() {
        assert!(Dialect::OpenAi.parse_line("data: {broken json").is_err());
    }

    #[test]
    fn test_blank_lines_skipped() {
        for dialect in [Dialect::Ollama, Dialect::OpenAi] {
            assert_eq!(dialect.parse_line("   ").unwrap(), Frame::Skip);
        }
    }

    #[test]
    fn test_unknown_provider() {
        assert!(Dialect::for_provider("anthropic").is_err());
    }

    #[test]
    fn test_request_shape_per_dialect() {
        let config = LlmConfig::default();
        let openai = serde_json::to_value(StreamRequest::new(
            Dialect::OpenAi,
            &config,
            vec![ChatMessage::user("salut")],
        ))
        .unwrap();
        assert_eq!(openai["stream"], true);
        assert!(openai.get("temperature").is_some());
        assert!(openai.get("options").is_none());

        let ollama =
            serde_json::to_value(StreamRequest::new(Dialect::Ollama, &config, vec![])).unwrap();
        assert!(ollama.get("temperature").is_none());
        assert!(ollama["options"].get("temperature").is_some());
    }

    // ─── Streams ─────────────────────────────────────────

    fn byte_chunks(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(bytes::Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_lines_reassembled_across_chunks() {
        let lines: Vec<String> = stream_lines(byte_chunks(vec![
            &b"data: {\"a\""[..],
            &b":1}\r\n\r\ndata: [DO"[..],
            &b"NE]\n"[..],
        ]))
        .map(|l| l.unwrap())
        .collect()
        .await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "ă" is 0xC4 0x83
        let lines: Vec<String> = stream_lines(byte_chunks(vec![&b"concediu pl\xC4"[..], &b"\x83tit\n"[..]]))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["concediu plătit"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_emitted() {
        let lines: Vec<String> = stream_lines(byte_chunks(vec![&b"first\nsecond"[..]]))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_deltas_stop_at_done() {
        let lines = stream::iter(
            [
                r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"Art. "}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"145"}}]}"#,
                "data: [DONE]",
                r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
            ]
            .into_iter()
            .map(|l| Ok(l.to_string()))
            .collect::<Vec<_>>(),
        );
        let out: Vec<String> = deltas(lines, Dialect::OpenAi)
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["Art. ", "145"]);
    }

    #[tokio::test]
    async fn test_deltas_surface_parse_errors() {
        let lines = stream::iter(vec![
            Ok(r#"{"message":{"role":"assistant","content":"Da"},"done":false}"#.to_string()),
            Ok("{oops".to_string()),
        ]);
        let out: Vec<Result<String>> = deltas(lines, Dialect::Ollama).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "Da");
        assert!(out[1].is_err());
    }
}
