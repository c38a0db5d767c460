use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

use super::post_json;

/// Maximum bytes sent per text to the embedding API.
/// Legal prose with diacritics runs near 1 token per 3 bytes, so this stays
/// well inside the 8 191-token input limit of the OpenAI embedding models.
const MAX_EMBED_CHARS: usize = 12_000;

const OLLAMA_BATCH_SIZE: usize = 32;
const OPENAI_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Ollama,
    OpenAi,
}

impl Backend {
    fn for_provider(provider: &str) -> Result<Self> {
        match provider {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        }
    }

    fn batch_size(self) -> usize {
        match self {
            Self::Ollama => OLLAMA_BATCH_SIZE,
            Self::OpenAi => OPENAI_BATCH_SIZE,
        }
    }
}

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Embed `texts` with the configured provider, one vector per input, in order.
pub async fn embed_batch(
    client: &reqwest::Client,
    config: &LlmConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let backend = Backend::for_provider(&config.provider)?;

    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(backend.batch_size()) {
        let input: Vec<&str> = batch.iter().map(|t| truncate_for_embedding(t)).collect();
        let got = match backend {
            Backend::Ollama => embed_ollama(client, config, input).await?,
            Backend::OpenAi => embed_openai(client, config, input).await?,
        };
        vectors.extend(got);
    }

    ensure_one_per_input(texts.len(), vectors)
}

/// Embed a single text, typically a search query.
pub async fn embed_single(
    client: &reqwest::Client,
    config: &LlmConfig,
    text: &str,
) -> Result<Vec<f32>> {
    embed_batch(client, config, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .context("No embedding returned")
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    /// Let Ollama cut inputs longer than the model context instead of failing.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    input: Vec<&str>,
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);
    let req = OllamaEmbedRequest {
        model: &config.embedding_model,
        input,
        truncate: true,
    };
    let body: OllamaEmbedResponse = post_json(client, config, &url, &req, "Ollama embed API").await?;
    Ok(body.embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedResponse {
    /// Vectors in input order; the API does not promise to keep it.
    fn into_vectors(self) -> Vec<Vec<f32>> {
        let mut data = self.data;
        data.sort_by_key(|d| d.index);
        data.into_iter().map(|d| d.embedding).collect()
    }
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    input: Vec<&str>,
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let req = OpenAiEmbedRequest {
        model: &config.embedding_model,
        input,
    };
    let body: OpenAiEmbedResponse = post_json(client, config, &url, &req, "OpenAI embed API").await?;
    Ok(body.into_vectors())
}

fn ensure_one_per_input(expected: usize, embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if embeddings.len() != expected {
        anyhow::bail!(
            "Embedding API returned {} vectors for {expected} inputs",
            embeddings.len()
        );
    }
    Ok(embeddings)
}
