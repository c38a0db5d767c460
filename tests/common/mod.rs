//! Scripted stand-ins for the LLM and the vector store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::json;

use labor_code_chat::config::APOLOGY_MESSAGE;
use labor_code_chat::llm::{ChatModel, ChatStream};
use labor_code_chat::models::{ChatMessage, Passage};
use labor_code_chat::pipeline::{Orchestrator, PipelineSettings};
use labor_code_chat::retry::RetryPolicy;
use labor_code_chat::search::Retriever;

/// Replies to `complete` calls in order; `stream` plays a fixed script once.
#[derive(Default)]
pub struct FakeModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    stream_script: Mutex<Option<Vec<Result<String, String>>>>,
    prompts: Mutex<Vec<String>>,
    complete_delay: Option<Duration>,
    stall_after_script: bool,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail_times(self, n: usize) -> Self {
        for _ in 0..n {
            self.replies.lock().push_back(Err("upstream 503".to_string()));
        }
        self
    }

    pub fn streaming(self, chunks: Vec<Result<&str, &str>>) -> Self {
        *self.stream_script.lock() = Some(
            chunks
                .into_iter()
                .map(|c| c.map(str::to_string).map_err(str::to_string))
                .collect(),
        );
        self
    }

    /// Every `complete` call sleeps for `delay` before replying.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.complete_delay = Some(delay);
        self
    }

    /// The stream never ends after its script is played.
    pub fn stalling(mut self) -> Self {
        self.stall_after_script = true;
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn record(&self, messages: &[ChatMessage]) {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().push(prompt);
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        self.record(&messages);
        if let Some(delay) = self.complete_delay {
            tokio::time::sleep(delay).await;
        }
        match self.replies.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        self.record(&messages);
        let script = self
            .stream_script
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("stream unavailable"))?;
        let played = stream::iter(script.into_iter().map(|c| c.map_err(anyhow::Error::msg)));
        if self.stall_after_script {
            Ok(Box::pin(played.chain(stream::pending())))
        } else {
            Ok(Box::pin(played))
        }
    }
}

/// Returns fixed passages after failing a set number of times.
pub struct FakeRetriever {
    passages: Vec<Passage>,
    failures_left: Mutex<usize>,
    queries: Mutex<Vec<(String, usize)>>,
}

impl FakeRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            failures_left: Mutex::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self, times: usize) -> Self {
        *self.failures_left.lock() = times;
        self
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        self.queries.lock().push((query.to_string(), k));
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("vector store unreachable");
            }
        }
        Ok(self.passages.clone())
    }
}

pub fn passage(text: &str) -> Passage {
    Passage {
        text: text.to_string(),
        metadata: json!({ "source": "codul_muncii" }),
    }
}

pub fn labor_code_passages() -> Vec<Passage> {
    vec![
        passage("Art. 145 (1) Durata minimă a concediului de odihnă anual este de 20 de zile lucrătoare."),
        passage("Art. 146 (1) Concediul de odihnă se efectuează în fiecare an."),
    ]
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        history_window: 10,
        top_k: 5,
        retry: RetryPolicy::new(3, 0),
        apology: APOLOGY_MESSAGE.to_string(),
    }
}

pub fn orchestrator(
    model: Arc<FakeModel>,
    retriever: Arc<FakeRetriever>,
    settings: PipelineSettings,
) -> Orchestrator {
    Orchestrator::new(model, retriever, settings)
}
