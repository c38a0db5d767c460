//! Supabase (PostgREST + pgvector) backend.
//!
//! Expects the usual `documents` table (`content`, `metadata`, `embedding`)
//! and a `match_documents(query_embedding, match_count, filter)` SQL function
//! returning rows ordered by similarity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::{LlmConfig, RetrieverConfig};
use crate::llm::embeddings::embed_single;
use crate::models::Passage;

use super::Retriever;

/// Rows inserted per request during ingestion.
const INSERT_BATCH_SIZE: usize = 100;

pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table_name: String,
    query_name: String,
    llm: LlmConfig,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    filter: serde_json::Value,
}

#[derive(Deserialize)]
struct MatchRow {
    content: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    similarity: Option<f32>,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    content: &'a str,
    metadata: &'a serde_json::Value,
    embedding: &'a [f32],
}

impl SupabaseStore {
    pub fn from_config(
        client: reqwest::Client,
        retriever: &RetrieverConfig,
        llm: &LlmConfig,
    ) -> Result<Self> {
        let base_url = retriever
            .supabase_url
            .clone()
            .context("SUPABASE_URL is not set")?;
        let api_key = retriever
            .supabase_key
            .clone()
            .context("SUPABASE_KEY is not set")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            table_name: retriever.table_name.clone(),
            query_name: retriever.query_name.clone(),
            llm: llm.clone(),
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// The similarity RPC request. No per-request timeout is set: the call
    /// is bounded only by the shared client's connect timeout.
    fn match_request(&self, embedding: &[f32], k: usize) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, self.query_name);
        let req = MatchRequest {
            query_embedding: embedding,
            match_count: k,
            filter: serde_json::json!({}),
        };
        self.authorized(self.client.post(url)).json(&req)
    }

    /// Run the similarity RPC for an already-embedded query.
    pub async fn match_documents(&self, embedding: &[f32], k: usize) -> Result<Vec<Passage>> {
        let resp = self
            .match_request(embedding, k)
            .send()
            .await
            .context("Failed to call Supabase match RPC")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Supabase match RPC returned {status}: {body}");
        }

        let rows: Vec<MatchRow> = resp
            .json()
            .await
            .context("Failed to parse Supabase match response")?;
        Ok(rows_to_passages(rows, k))
    }

    /// Insert passages with their embeddings into the documents table.
    pub async fn insert_documents(
        &self,
        passages: &[Passage],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        if passages.len() != embeddings.len() {
            anyhow::bail!(
                "Got {} embeddings for {} passages",
                embeddings.len(),
                passages.len()
            );
        }

        let url = format!("{}/rest/v1/{}", self.base_url, self.table_name);
        let rows: Vec<InsertRow> = passages
            .iter()
            .zip(embeddings)
            .map(|(p, e)| InsertRow {
                content: &p.text,
                metadata: &p.metadata,
                embedding: e,
            })
            .collect();

        for batch in rows.chunks(INSERT_BATCH_SIZE) {
            let resp = self
                .authorized(self.client.post(&url))
                .header("Prefer", "return=minimal")
                .json(batch)
                .send()
                .await
                .context("Failed to insert documents into Supabase")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Supabase insert returned {status}: {body}");
            }
        }

        Ok(rows.len())
    }
}

fn rows_to_passages(rows: Vec<MatchRow>, k: usize) -> Vec<Passage> {
    rows.into_iter()
        .take(k)
        .map(|row| {
            let mut metadata = row.metadata;
            if let (Some(score), serde_json::Value::Object(map)) = (row.similarity, &mut metadata) {
                map.entry("similarity")
                    .or_insert_with(|| serde_json::json!(score));
            }
            Passage {
                text: row.content,
                metadata,
            }
        })
        .collect()
}

#[async_trait]
impl Retriever for SupabaseStore {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let started = Instant::now();
        let embedding = embed_single(&self.client, &self.llm, query)
            .await
            .context("Failed to embed query")?;
        let passages = self.match_documents(&embedding, k).await?;
        tracing::info!(
            "Supabase retrieval returned {} passages in {}ms",
            passages.len(),
            started.elapsed().as_millis()
        );
        Ok(passages)
    }
}
