//! Episodes, counterfactuals and reflection validation

use serde::{Deserialize, Serialize};

use crate::core::math::cosine_similarity;
use crate::core::types::Tick;

/// One executed action as remembered by the reflection machinery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEvent {
    pub tick: Tick,
    pub action_id: String,
    pub action_name: String,
    pub success: bool,
    pub reward: f32,
    pub status: String,
    pub valence: f32,
}

impl EpisodeEvent {
    pub fn describe(&self) -> String {
        format!(
            "tick {} action {} ({}) outcome {} reward {:.2}",
            self.tick,
            self.action_id,
            if self.success { "success" } else { "failure" },
            self.status,
            self.reward
        )
    }
}

/// A themed, time-bounded chunk of experience; never mutated once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub theme: String,
    pub emotional_valence_curve: Vec<f32>,
    pub events: Vec<EpisodeEvent>,
    pub goal_at_start: Option<String>,
    pub goal_at_end: Option<String>,
}

impl Episode {
    pub fn from_events(
        events: Vec<EpisodeEvent>,
        theme: String,
        goal_at_start: Option<String>,
        goal_at_end: Option<String>,
    ) -> Option<Self> {
        let start_tick = events.first()?.tick;
        let end_tick = events.last()?.tick;
        let emotional_valence_curve = events.iter().map(|e| e.valence).collect();
        Some(Self {
            start_tick,
            end_tick,
            theme,
            emotional_valence_curve,
            events,
            goal_at_start,
            goal_at_end,
        })
    }

    /// Event with the largest |reward|
    pub fn key_event(&self) -> Option<&EpisodeEvent> {
        self.events
            .iter()
            .max_by(|a, b| a.reward.abs().total_cmp(&b.reward.abs()))
    }

    pub fn event_text(&self) -> String {
        self.events
            .iter()
            .map(EpisodeEvent::describe)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualEpisode {
    pub original_episode_theme: String,
    pub original_action: String,
    pub counterfactual_action: String,
    pub predicted_outcome: String,
    pub confidence: f32,
}

impl CounterfactualEpisode {
    /// Parse the `ALTERNATIVE ACTION:` / `PREDICTED OUTCOME:` reply format
    pub fn parse(response: &str, episode: &Episode, original_action: &str) -> Self {
        let mut alternative = "Unknown".to_string();
        let mut outcome = "Prediction failed.".to_string();
        for line in response.lines() {
            if let Some((_, rest)) = line.split_once("ALTERNATIVE ACTION:") {
                alternative = rest.trim().to_string();
            } else if let Some((_, rest)) = line.split_once("PREDICTED OUTCOME:") {
                outcome = rest.trim().to_string();
            }
        }
        Self {
            original_episode_theme: episode.theme.clone(),
            original_action: original_action.to_string(),
            counterfactual_action: alternative,
            predicted_outcome: outcome,
            confidence: 0.8,
        }
    }
}

/// Sanity checks for a reflective account
pub struct RuleValidator;

impl RuleValidator {
    /// An account cannot claim opposite feelings at once
    pub fn check_coherence(inference: &str) -> bool {
        let lower = inference.to_lowercase();
        !(lower.contains("i felt happy") && lower.contains("i felt sad"))
    }

    /// Similarity between the account and what actually happened, in [0, 1]
    pub fn factual_alignment(inference_embedding: &[f32], events_embedding: &[f32]) -> f32 {
        cosine_similarity(inference_embedding, events_embedding).max(0.0)
    }

    /// Incoherent accounts score zero; otherwise half credit plus alignment
    pub fn confidence(coherent: bool, alignment: f32) -> f32 {
        if !coherent {
            0.0
        } else {
            (0.5 + 0.5 * alignment).clamp(0.0, 1.0)
        }
    }
}
