//! Simulation configuration with documented constants
//!
//! Every tunable number used by the engine and the cognitive systems is
//! collected here. The tree mirrors the TOML layout, so the dotted path of a
//! field (`learning.q_learning.gamma`) is also its key in a config file.
//! Every section has defaults, so a config file only needs the values it
//! wants to override.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{ArlaError, Result};

/// Root configuration object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArlaConfig {
    pub simulation: SimulationSection,
    pub agent: AgentSection,
    pub learning: LearningSection,
    pub llm: LlmSection,
}

// === SIMULATION ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Maximum number of ticks in a run
    pub steps: u64,

    /// Seed for the simulation RNG (entity shuffle, emotion noise, identity init)
    pub random_seed: u64,

    /// Root directory for snapshots, manifests and exporter output
    pub log_directory: String,

    /// Ticks between periodic snapshots
    ///
    /// A final snapshot is always written at the end of a completed run.
    pub snapshot_interval: u64,

    /// Fixed run id; generated as `sim_<millis>_<hex>` when absent
    pub simulation_id: Option<String>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            steps: 100,
            random_seed: 42,
            log_directory: "runs".into(),
            snapshot_interval: 50,
            simulation_id: None,
        }
    }
}

// === AGENT ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub cognitive: CognitiveSection,
    pub emotional_dynamics: EmotionalDynamicsSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitiveSection {
    pub embeddings: EmbeddingsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsSection {
    /// Dimension of goal, trait and narrative embeddings
    pub main_embedding_dim: usize,

    /// Dimension of each identity domain embedding
    ///
    /// Trait embeddings are projected into identity space, so in practice
    /// this should equal `main_embedding_dim`.
    pub identity_dim: usize,
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        Self {
            main_embedding_dim: 32,
            identity_dim: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionalDynamicsSection {
    pub temporal: TemporalSection,

    /// Standard deviation of the Gaussian noise added to each emotion update
    pub noise_std: f32,

    pub appraisal_weights: AppraisalWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalSection {
    /// Fraction of current valence kept per update
    pub valence_decay_rate: f32,

    /// Fraction of current arousal kept per update
    ///
    /// Lower than valence so arousal spikes fade faster than mood.
    pub arousal_decay_rate: f32,

    /// Weight of the appraised valence target
    pub valence_learning_rate: f32,

    /// Weight of the appraised arousal target
    pub arousal_learning_rate: f32,
}

impl Default for TemporalSection {
    fn default() -> Self {
        Self {
            valence_decay_rate: 0.9,
            arousal_decay_rate: 0.85,
            valence_learning_rate: 0.1,
            arousal_learning_rate: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppraisalWeights {
    pub goal_relevance: f32,
    pub agency: f32,
    pub social_feedback: f32,
}

impl Default for AppraisalWeights {
    fn default() -> Self {
        Self {
            goal_relevance: 1.0,
            agency: 1.0,
            social_feedback: 1.0,
        }
    }
}

impl Default for EmotionalDynamicsSection {
    fn default() -> Self {
        Self {
            temporal: TemporalSection::default(),
            noise_std: 0.02,
            appraisal_weights: AppraisalWeights::default(),
        }
    }
}

// === LEARNING ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSection {
    pub q_learning: QLearningSection,
    pub memory: MemorySection,
    pub causal: CausalSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearningSection {
    /// Discount factor for the Bellman target
    pub gamma: f32,

    /// Adam learning rate for the utility network
    pub alpha: f32,

    pub initial_epsilon: f32,
    pub min_epsilon: f32,
    pub epsilon_decay_rate: f32,

    /// Weight of the causal effect estimate when blended into the reward
    ///
    /// 0.5 gives the observed reward and the causal estimate equal say.
    pub causal_blend: f32,
}

impl Default for QLearningSection {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            alpha: 0.001,
            initial_epsilon: 0.1,
            min_epsilon: 0.01,
            epsilon_decay_rate: 0.995,
            causal_blend: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Ticks between scheduled reflections
    pub reflection_interval: u64,

    /// Buffered affective experiences needed before emotion discovery runs
    pub emotion_cluster_min_data: usize,

    /// Hard cap on the affective experience buffer
    pub affective_buffer_maxlen: usize,

    pub short_term_memory_maxlen: usize,

    /// Successful memories needed before a goal can be invented
    pub goal_invention_min_successes: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            reflection_interval: 50,
            emotion_cluster_min_data: 50,
            affective_buffer_maxlen: 200,
            short_term_memory_maxlen: 10,
            goal_invention_min_successes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalSection {
    /// Multiplier applied to every causal edge on a decay tick
    pub decay_rate: f32,

    /// Edges decay when `(tick + 1) % decay_interval == 0`
    pub decay_interval: u64,

    /// Edges lighter than this are pruned after decay
    pub prune_threshold: f32,

    /// Causal records needed before a model is fitted
    pub min_samples: usize,

    /// Ticks between causal model refits
    pub refit_interval: u64,
}

impl Default for CausalSection {
    fn default() -> Self {
        Self {
            decay_rate: 0.95,
            decay_interval: 10,
            prune_threshold: 0.01,
            min_samples: 20,
            refit_interval: 50,
        }
    }
}

// === LLM ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Deterministic local model, no network
    Offline,
    /// HTTP API configured through LLM_API_KEY / LLM_API_URL / LLM_MODEL
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: LlmProvider,
    pub completion_model: String,
    pub embedding_model: String,
    pub max_tokens: u32,
    pub temperature: f32,

    /// Used to estimate the cost of each logged interaction
    pub cost_per_1k_tokens: f32,

    /// JSON-lines file receiving every scaffold interaction
    pub interaction_log: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Offline,
            completion_model: "claude-3-haiku-20240307".into(),
            embedding_model: "text-embedding-3-small".into(),
            max_tokens: 512,
            temperature: 0.2,
            cost_per_1k_tokens: 0.0,
            interaction_log: None,
        }
    }
}

impl ArlaConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ArlaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        fn unit(path: &str, value: f32) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(ArlaError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    path, value
                )));
            }
            Ok(())
        }

        let t = &self.agent.emotional_dynamics.temporal;
        unit("agent.emotional_dynamics.temporal.valence_decay_rate", t.valence_decay_rate)?;
        unit("agent.emotional_dynamics.temporal.arousal_decay_rate", t.arousal_decay_rate)?;
        unit("agent.emotional_dynamics.temporal.valence_learning_rate", t.valence_learning_rate)?;
        unit("agent.emotional_dynamics.temporal.arousal_learning_rate", t.arousal_learning_rate)?;
        if self.agent.emotional_dynamics.noise_std < 0.0 {
            return Err(ArlaError::Config(
                "agent.emotional_dynamics.noise_std must be non-negative".into(),
            ));
        }

        let q = &self.learning.q_learning;
        unit("learning.q_learning.gamma", q.gamma)?;
        unit("learning.q_learning.causal_blend", q.causal_blend)?;
        unit("learning.q_learning.initial_epsilon", q.initial_epsilon)?;
        if q.alpha <= 0.0 {
            return Err(ArlaError::Config("learning.q_learning.alpha must be positive".into()));
        }

        let c = &self.learning.causal;
        unit("learning.causal.decay_rate", c.decay_rate)?;
        if c.decay_interval == 0 || c.refit_interval == 0 {
            return Err(ArlaError::Config(
                "learning.causal intervals must be positive".into(),
            ));
        }

        if self.learning.memory.reflection_interval == 0 {
            return Err(ArlaError::Config(
                "learning.memory.reflection_interval must be positive".into(),
            ));
        }
        if self.simulation.snapshot_interval == 0 {
            return Err(ArlaError::Config(
                "simulation.snapshot_interval must be positive".into(),
            ));
        }

        let e = &self.agent.cognitive.embeddings;
        if e.main_embedding_dim == 0 || e.identity_dim == 0 {
            return Err(ArlaError::Config("embedding dimensions must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ArlaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning.memory.reflection_interval, 50);
        assert_eq!(config.learning.q_learning.gamma, 0.99);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [simulation]
            steps = 7

            [learning.q_learning]
            gamma = 0.5
        "#;
        let config = ArlaConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.simulation.steps, 7);
        assert_eq!(config.learning.q_learning.gamma, 0.5);
        assert_eq!(config.simulation.random_seed, 42);
        assert_eq!(config.agent.cognitive.embeddings.main_embedding_dim, 32);
    }

    #[test]
    fn test_out_of_range_rate_rejected() {
        let toml = r#"
            [learning.causal]
            decay_rate = 1.5
        "#;
        let err = ArlaConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("learning.causal.decay_rate"));
    }

    #[test]
    fn test_llm_provider_parses_lowercase() {
        let toml = r#"
            [llm]
            provider = "http"
        "#;
        let config = ArlaConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Http);
    }
}
