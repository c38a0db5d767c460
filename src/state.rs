use std::sync::Arc;

use crate::config::Config;
use crate::llm::HttpChatModel;
use crate::pipeline::{Orchestrator, PipelineSettings};
use crate::search::build_retriever;
use crate::store::ChatStore;
use crate::streams::StreamRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub chats: Arc<ChatStore>,
    pub streams: Arc<StreamRegistry>,
    pub turn_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(&config.data_dir)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let model = Arc::new(HttpChatModel::new(http_client.clone(), config.llm.clone()));
        let retriever = build_retriever(&config, &http_client)?;
        let orchestrator =
            Orchestrator::new(model, retriever, PipelineSettings::from_config(&config));

        Self::with_orchestrator(config, orchestrator)
    }

    /// Build state around an existing orchestrator (used by tests and the CLI).
    pub fn with_orchestrator(config: Config, orchestrator: Orchestrator) -> anyhow::Result<Self> {
        let chats = ChatStore::open_or_create(&config.chats_dir())?;
        let max_turns = config.max_concurrent_turns.max(1);

        Ok(Self {
            config,
            orchestrator,
            chats: Arc::new(chats),
            streams: Arc::new(StreamRegistry::new()),
            turn_semaphore: Arc::new(tokio::sync::Semaphore::new(max_turns)),
        })
    }
}
