use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::retry::RetryPolicy;

/// Apology returned when a turn cannot be answered.
pub const APOLOGY_MESSAGE: &str =
    "Îmi pare rău, dar nu am putut genera un răspuns în acest moment!";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where chat records and the local vector store live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Vector store configuration
    pub retriever: RetrieverConfig,
    /// Retry policy applied to every external call
    pub retry: RetryPolicy,
    /// Question-answering pipeline settings
    pub pipeline: PipelineConfig,
    /// Maximum chat turns processed at once
    pub max_concurrent_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "ollama"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat completions
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    pub temperature: f32,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverBackend {
    /// Hosted Supabase table queried through a `match_documents` RPC.
    Supabase,
    /// JSON-persisted store under the data directory.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub backend: RetrieverBackend,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    /// Table holding `content`, `metadata` and `embedding` columns.
    pub table_name: String,
    /// Name of the similarity-search RPC function.
    pub query_name: String,
    /// Passages fetched per question.
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of prior messages included in prompts.
    pub history_window: usize,
    /// Reply sent when the rewrite or answer stage gives up.
    pub apology: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:3000".to_string(),
            llm: LlmConfig::default(),
            retriever: RetrieverConfig::default(),
            retry: RetryPolicy::default(),
            pipeline: PipelineConfig::default(),
            max_concurrent_turns: 8,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            api_key: None,
            temperature: 0.3,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            backend: RetrieverBackend::Supabase,
            supabase_url: None,
            supabase_key: None,
            table_name: "documents".to_string(),
            query_name: "match_documents".to_string(),
            top_k: 5,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            apology: APOLOGY_MESSAGE.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LABOR_CHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("LABOR_CHAT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("LABOR_CHAT_MAX_CONCURRENT_TURNS") {
            if let Ok(v) = val.parse::<usize>() {
                config.max_concurrent_turns = v.max(1);
            }
        }

        // LLM config
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                config.llm.temperature = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.timeout_secs = v;
            }
        }

        // Retriever config
        if let Ok(backend) = std::env::var("RETRIEVER_BACKEND") {
            match backend.to_lowercase().as_str() {
                "supabase" => config.retriever.backend = RetrieverBackend::Supabase,
                "local" => config.retriever.backend = RetrieverBackend::Local,
                other => tracing::warn!("Ignoring unknown RETRIEVER_BACKEND '{other}'"),
            }
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            config.retriever.supabase_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Ok(key) = std::env::var("SUPABASE_KEY") {
            config.retriever.supabase_key = Some(key);
        }
        if let Ok(table) = std::env::var("SUPABASE_TABLE") {
            config.retriever.table_name = table;
        }
        if let Ok(name) = std::env::var("SUPABASE_QUERY_NAME") {
            config.retriever.query_name = name;
        }
        if let Ok(val) = std::env::var("RETRIEVER_TOP_K") {
            if let Ok(v) = val.parse::<usize>() {
                config.retriever.top_k = v.clamp(1, 20);
            }
        }

        // Retry policy
        if let Ok(val) = std::env::var("RETRY_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse::<u32>() {
                config.retry.max_attempts = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("RETRY_BASE_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.retry.base_delay_ms = v;
            }
        }

        if let Ok(val) = std::env::var("CHAT_HISTORY_WINDOW") {
            if let Ok(v) = val.parse() {
                config.pipeline.history_window = v;
            }
        }

        config
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.data_dir.join("chats")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retriever.top_k, 5);
        assert_eq!(config.retriever.backend, RetrieverBackend::Supabase);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.pipeline.history_window, 10);
        assert_eq!(config.pipeline.apology, APOLOGY_MESSAGE);
        assert_eq!(config.llm.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/labor"),
            ..Config::default()
        };
        assert_eq!(config.chats_dir(), PathBuf::from("/tmp/labor/chats"));
        assert_eq!(config.vector_dir(), PathBuf::from("/tmp/labor/vectors"));
    }

    #[test]
    fn test_backend_serializes_to_snake_case() {
        let json = serde_json::to_value(RetrieverBackend::Local).unwrap();
        assert_eq!(json, "local");
    }
}
