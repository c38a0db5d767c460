//! Passage retrieval: the [`Retriever`] seam and its vector-store backends.

pub mod supabase;
pub mod vector;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{Config, LlmConfig, RetrieverBackend};
use crate::llm::embeddings::embed_single;
use crate::models::Passage;

use self::supabase::SupabaseStore;
use self::vector::VectorStore;

/// Top-k similarity search over the stored legal passages.
///
/// Results come back most-similar first. Implementations do no caching,
/// re-ranking or de-duplication; store errors are returned as-is.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

/// [`Retriever`] over the local JSON-persisted [`VectorStore`].
pub struct LocalRetriever {
    store: Arc<VectorStore>,
    client: reqwest::Client,
    llm: LlmConfig,
}

impl LocalRetriever {
    pub fn new(store: Arc<VectorStore>, client: reqwest::Client, llm: LlmConfig) -> Self {
        Self { store, client, llm }
    }
}

#[async_trait]
impl Retriever for LocalRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let embedding = embed_single(&self.client, &self.llm, query)
            .await
            .context("Failed to embed query")?;
        Ok(self
            .store
            .search(&embedding, k)
            .into_iter()
            .map(|hit| hit.passage)
            .collect())
    }
}

/// Build the retriever selected by `config.retriever.backend`.
pub fn build_retriever(config: &Config, client: &reqwest::Client) -> Result<Arc<dyn Retriever>> {
    match config.retriever.backend {
        RetrieverBackend::Supabase => {
            let store = SupabaseStore::from_config(client.clone(), &config.retriever, &config.llm)?;
            Ok(Arc::new(store))
        }
        RetrieverBackend::Local => {
            let store = VectorStore::open_or_create(&config.vector_dir())?;
            Ok(Arc::new(LocalRetriever::new(
                Arc::new(store),
                client.clone(),
                config.llm.clone(),
            )))
        }
    }
}
