use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use labor_code_chat::api;
use labor_code_chat::chunking::{chunk_document, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use labor_code_chat::config::{Config, RetrieverBackend};
use labor_code_chat::llm::embeddings::embed_batch;
use labor_code_chat::models::AiState;
use labor_code_chat::retry::retry_with_backoff;
use labor_code_chat::search::supabase::SupabaseStore;
use labor_code_chat::search::vector::VectorStore;
use labor_code_chat::state::AppState;

/// Passages embedded and stored per ingestion step.
const INGEST_BATCH_SIZE: usize = 64;

#[derive(Parser)]
#[command(name = "labor-code-chat", version, about = "Chat about the Romanian Labor Code")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Answer a single question and exit
    Ask {
        question: String,
    },
    /// Split a text file into passages, embed them and load the vector store
    Ingest {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        chunk_overlap: usize,
        /// Empty the local store first (local backend only)
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ask { question } => ask(config, &question).await,
        Command::Ingest {
            file,
            chunk_size,
            chunk_overlap,
            clear,
        } => ingest(config, &file, chunk_size, chunk_overlap, clear).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone())?;

    // No CORS layer: the API is meant to sit behind the same origin as its UI.
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask(config: Config, question: &str) -> anyhow::Result<()> {
    let question = question.trim();
    if question.is_empty() {
        anyhow::bail!("Question is empty");
    }

    let state = AppState::new(config)?;
    let chat_id = uuid::Uuid::new_v4().simple().to_string();
    let outcome = state
        .orchestrator
        .answer(AiState::new(chat_id), question)
        .await;

    if let Some(standalone) = &outcome.standalone_question {
        tracing::info!("Standalone question: {standalone}");
    }
    println!("{}", outcome.reply);

    if !outcome.committed {
        anyhow::bail!("The question could not be answered");
    }
    Ok(())
}

async fn ingest(
    config: Config,
    file: &std::path::Path,
    chunk_size: usize,
    chunk_overlap: usize,
    clear: bool,
) -> anyhow::Result<()> {
    if chunk_overlap >= chunk_size {
        anyhow::bail!("chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})");
    }

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let passages = chunk_document(&text, chunk_size, chunk_overlap);
    tracing::info!("Split {} into {} passages", file.display(), passages.len());

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?;

    enum Sink {
        Supabase(SupabaseStore),
        Local(VectorStore),
    }

    let sink = match config.retriever.backend {
        RetrieverBackend::Supabase => {
            if clear {
                tracing::warn!("--clear is ignored for the Supabase backend");
            }
            Sink::Supabase(SupabaseStore::from_config(
                client.clone(),
                &config.retriever,
                &config.llm,
            )?)
        }
        RetrieverBackend::Local => {
            let store = VectorStore::open_or_create(&config.vector_dir())?;
            if clear {
                store.clear()?;
            }
            Sink::Local(store)
        }
    };

    let mut stored = 0;
    for batch in passages.chunks(INGEST_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let embeddings = retry_with_backoff(&config.retry, "embed passages", || {
            embed_batch(&client, &config.llm, &texts)
        })
        .await?;

        stored += match &sink {
            Sink::Supabase(store) => {
                retry_with_backoff(&config.retry, "store passages", || {
                    store.insert_documents(batch, &embeddings)
                })
                .await?
            }
            Sink::Local(store) => store.add_passages(batch, embeddings)?,
        };
        tracing::info!("Stored {stored}/{} passages", passages.len());
    }

    tracing::info!("Ingestion complete: {stored} passages");
    Ok(())
}
