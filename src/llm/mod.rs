//! Language-model access for the cognitive systems

pub mod client;
pub mod model;
pub mod prompts;
pub mod scaffold;

pub use client::{Completion, LlmClient};
pub use model::{HashingEmbedder, HttpLanguageModel, LanguageModel, OfflineLanguageModel};
pub use scaffold::{CognitiveScaffold, InteractionLog, InteractionRecord};
