//! Language-model backends
//!
//! The cognitive systems call a synchronous `LanguageModel`. The HTTP
//! backend blocks on a tokio runtime handle for each request; the offline
//! backend answers every prompt deterministically from its content so runs
//! without network access still exercise the full pipeline.

use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use tokio::runtime::Handle;

use crate::core::error::Result;
use crate::core::math::normalize;
use crate::llm::client::{Completion, LlmClient};

pub trait LanguageModel {
    fn name(&self) -> &str;

    fn complete(&self, prompt: &str) -> Result<Completion>;

    /// Embedding of `text` with exactly `dim` components
    fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>>;
}

const SYSTEM_PROMPT: &str = "You are the inner voice of an agent in a simulation. \
    Answer briefly and follow any requested format exactly.";

pub struct HttpLanguageModel {
    client: LlmClient,
    runtime: Handle,
}

impl HttpLanguageModel {
    /// `runtime` must not be the runtime of the calling thread
    pub fn new(client: LlmClient, runtime: Handle) -> Self {
        Self { client, runtime }
    }
}

impl LanguageModel for HttpLanguageModel {
    fn name(&self) -> &str {
        "http"
    }

    fn complete(&self, prompt: &str) -> Result<Completion> {
        self.runtime.block_on(self.client.complete(SYSTEM_PROMPT, prompt))
    }

    fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>> {
        let raw = self.runtime.block_on(self.client.embed(text))?;
        Ok(fit_dimension(&raw, dim))
    }
}

/// Truncate or zero-pad to `dim`, then renormalize
pub fn fit_dimension(values: &[f32], dim: usize) -> Vec<f32> {
    let mut out: Vec<f32> = values.iter().copied().take(dim).collect();
    out.resize(dim, 0.0);
    normalize(&out)
}

/// Bag-of-words feature hashing into a fixed-size unit vector
///
/// Texts sharing words get similar embeddings, which is all the goal and
/// identity systems need from an offline backend.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    hasher: RandomState,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            hasher: RandomState::with_seeds(0x51, 0xA7, 0x3C, 0xE9),
        }
    }
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embed(&self, text: &str, dim: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; dim];
        if dim == 0 {
            return out;
        }
        for token in tokens(text) {
            let mut h = self.hasher.build_hasher();
            token.hash(&mut h);
            let hash = h.finish();
            let bucket = (hash % dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            out[bucket] += sign;
        }
        normalize(&out)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Deterministic stand-in for a hosted model
#[derive(Debug, Clone, Default)]
pub struct OfflineLanguageModel {
    embedder: HashingEmbedder,
}

impl OfflineLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn respond(&self, prompt: &str) -> String {
        if prompt.contains("single-word emotion") {
            return name_emotion(prompt).to_string();
        }
        if prompt.contains("summarize the theme") {
            return match dominant_action(prompt) {
                Some(action) => format!("{} Streak", capitalize(&action)),
                None => "Quiet Stretch".to_string(),
            };
        }
        if prompt.contains("identify 1-2 key traits") {
            return infer_traits(prompt);
        }
        if prompt.contains("high-level goal") {
            return match dominant_action(prompt) {
                Some(action) => format!("Master {}", capitalize(&action)),
                None => "Stay Alive".to_string(),
            };
        }
        if prompt.contains("ALTERNATIVE ACTION:") {
            let alternative = if prompt.contains("'rest'") { "forage" } else { "rest" };
            return format!(
                "ALTERNATIVE ACTION: {}\nPREDICTED OUTCOME: The agent would have {} instead.",
                alternative,
                if alternative == "rest" { "recovered its strength" } else { "found more food" }
            );
        }
        if prompt.contains("first-person reflection") {
            let (positive, negative) = reward_signs(prompt);
            let mood = if positive >= negative {
                "I felt capable and my efforts paid off"
            } else {
                "I struggled and many of my efforts failed"
            };
            return format!(
                "{}. I am becoming someone who keeps going. I value steady progress, and I have \
                 learned that my choices shape what happens to me.",
                mood
            );
        }
        "I am not sure.".to_string()
    }
}

impl LanguageModel for OfflineLanguageModel {
    fn name(&self) -> &str {
        "offline"
    }

    fn complete(&self, prompt: &str) -> Result<Completion> {
        let text = self.respond(prompt);
        let tokens_used = (prompt.split_whitespace().count() + text.split_whitespace().count()) as u32;
        Ok(Completion { text, tokens_used })
    }

    fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text, dim))
    }
}

fn reward_signs(prompt: &str) -> (usize, usize) {
    let mut positive = 0;
    let mut negative = 0;
    for part in prompt.split("eward") {
        let value = part
            .trim_start_matches(|c: char| c == ':' || c == ' ' || c == '=')
            .split(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
            .next()
            .and_then(|s| s.parse::<f32>().ok());
        match value {
            Some(v) if v > 0.0 => positive += 1,
            Some(v) if v < 0.0 => negative += 1,
            _ => {}
        }
    }
    (positive, negative)
}

fn name_emotion(prompt: &str) -> &'static str {
    let (positive, negative) = reward_signs(prompt);
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => "joy",
        std::cmp::Ordering::Less => "frustration",
        std::cmp::Ordering::Equal => "calm",
    }
}

/// Most frequent quoted action id or `Action:` name in the prompt
fn dominant_action(prompt: &str) -> Option<String> {
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for marker in ["Action '", "action '", "Action: "] {
        for part in prompt.split(marker).skip(1) {
            let name: String = part
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                *counts.entry(name.to_lowercase()).or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(name, _)| name)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn infer_traits(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    let struggling = lower.contains("struggled") || lower.contains("failed");
    let (competence, agency) = if struggling { (0.3, 0.4) } else { (0.8, 0.7) };
    format!(
        "SOCIAL:\n- cooperative: {:.1}\nCOMPETENCE:\n- resourceful: {:.1}\nMORAL:\n- fair: 0.6\n\
         RELATIONAL:\n- loyal: 0.5\nAGENCY:\n- determined: {:.1}",
        if lower.contains("share") { 0.8 } else { 0.4 },
        competence,
        agency
    )
}
