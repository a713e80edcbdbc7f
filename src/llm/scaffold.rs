//! Single entry point for every language-model interaction
//!
//! `CognitiveScaffold::query` is blocking from the caller's point of view.
//! The record of each interaction is handed to an `InteractionLog` and never
//! awaited: logging is best effort and cannot change what `query` returns.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::core::config::LlmSection;
use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::llm::model::LanguageModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub simulation_id: String,
    pub tick: Tick,
    pub agent_id: String,
    pub purpose: String,
    pub prompt: String,
    pub llm_response: String,
    pub tokens_used: u32,
    pub cost_usd: f32,
}

/// Fire-and-forget sink for interaction records
#[derive(Debug, Clone)]
pub struct InteractionLog {
    sender: mpsc::UnboundedSender<InteractionRecord>,
}

impl InteractionLog {
    /// Log plus the receiving end, for callers that drain it themselves
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InteractionRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Append every record as one JSON line to `path` from a task on `runtime`
    pub fn spawn_jsonl(runtime: &Handle, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (log, mut receiver) = Self::channel();
        runtime.spawn(async move {
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!("Interaction log directory unavailable: {}", e);
                }
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Interaction log disabled, cannot open {}: {}", path.display(), e);
                    return;
                }
            };
            while let Some(record) = receiver.recv().await {
                let line = match serde_json::to_string(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Dropping interaction record: {}", e);
                        continue;
                    }
                };
                if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                    tracing::warn!("Interaction log write failed: {}", e);
                }
            }
            let _ = file.flush().await;
        });
        log
    }

    pub fn submit(&self, record: InteractionRecord) {
        if self.sender.send(record).is_err() {
            tracing::debug!("Interaction log receiver closed; record dropped");
        }
    }
}

/// Default number of embeddings a scaffold keeps
pub const EMBEDDING_CACHE_CAPACITY: usize = 2048;

/// Size-capped embedding cache that evicts the least recently used text
#[derive(Debug)]
struct EmbeddingCache {
    capacity: usize,
    clock: u64,
    entries: AHashMap<String, (Vec<f32>, u64)>,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            entries: AHashMap::new(),
        }
    }

    fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(text).map(|(embedding, used)| {
            *used = clock;
            embedding.clone()
        })
    }

    fn insert(&mut self, text: &str, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(text) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.clock += 1;
        self.entries.insert(text.to_string(), (embedding, self.clock));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct CognitiveScaffold {
    simulation_id: String,
    model: Box<dyn LanguageModel>,
    embedding_dim: usize,
    cost_per_1k_tokens: f32,
    log: Option<InteractionLog>,
    embedding_cache: RefCell<EmbeddingCache>,
    queries: Cell<u64>,
    tokens: Cell<u64>,
}

impl std::fmt::Debug for CognitiveScaffold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitiveScaffold")
            .field("simulation_id", &self.simulation_id)
            .field("model", &self.model.name())
            .field("queries", &self.queries.get())
            .finish()
    }
}

impl CognitiveScaffold {
    pub fn new(simulation_id: impl Into<String>, model: Box<dyn LanguageModel>, embedding_dim: usize) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            model,
            embedding_dim,
            cost_per_1k_tokens: 0.0,
            log: None,
            embedding_cache: RefCell::new(EmbeddingCache::new(EMBEDDING_CACHE_CAPACITY)),
            queries: Cell::new(0),
            tokens: Cell::new(0),
        }
    }

    pub fn with_settings(mut self, settings: &LlmSection) -> Self {
        self.cost_per_1k_tokens = settings.cost_per_1k_tokens;
        self
    }

    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        *self.embedding_cache.borrow_mut() = EmbeddingCache::new(capacity);
        self
    }

    pub fn with_log(mut self, log: InteractionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn cached_embeddings(&self) -> usize {
        self.embedding_cache.borrow().len()
    }

    /// `(queries, tokens)` so far
    pub fn usage(&self) -> (u64, u64) {
        (self.queries.get(), self.tokens.get())
    }

    pub fn query(&self, agent_id: &EntityId, purpose: &str, prompt: &str, tick: Tick) -> Result<String> {
        let completion = self.model.complete(prompt).map_err(|e| {
            tracing::warn!("LLM query '{}' for {} failed: {}", purpose, agent_id, e);
            e
        })?;

        self.queries.set(self.queries.get() + 1);
        self.tokens.set(self.tokens.get() + completion.tokens_used as u64);

        if let Some(log) = &self.log {
            log.submit(InteractionRecord {
                simulation_id: self.simulation_id.clone(),
                tick,
                agent_id: agent_id.to_string(),
                purpose: purpose.to_string(),
                prompt: prompt.to_string(),
                llm_response: completion.text.clone(),
                tokens_used: completion.tokens_used,
                cost_usd: completion.tokens_used as f32 / 1000.0 * self.cost_per_1k_tokens,
            });
        }
        Ok(completion.text)
    }

    /// Cached embedding of `text` at the scaffold's dimension
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.embedding_cache.borrow_mut().get(text) {
            return Ok(hit);
        }
        let embedding = self.model.embed(text, self.embedding_dim)?;
        if embedding.len() != self.embedding_dim {
            return Err(ArlaError::Llm(format!(
                "embedding has {} components, expected {}",
                embedding.len(),
                self.embedding_dim
            )));
        }
        self.embedding_cache.borrow_mut().insert(text, embedding.clone());
        Ok(embedding)
    }
}
