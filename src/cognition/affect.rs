//! Affective experience and emotion discovery
//!
//! Agents do not start with named emotions. Each executed action leaves an
//! `AffectiveExperience` (affect, vitality, action and outcome features).
//! Once enough have accumulated they are clustered, and each cluster is named
//! by the language model. The current emotion category is the name of the
//! learned cluster nearest to the latest experience.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cognition::clustering::{distance_squared, KMeans};
use crate::core::error::Result;
use crate::llm::prompts;

pub const UNKNOWN_EMOTION: &str = "unknown_emotion";
pub const UNNAMED_CLUSTER: &str = "unnamed";

/// Prediction-error bookkeeping after a new reward
///
/// Returns `(magnitude, new_prev_reward, new_smooth, prediction_error)`.
/// The smoothed delta tracks the saturated magnitude `min(|pe|, 1)`, which
/// keeps it inside [0, 1] without the clip ever swallowing the update.
pub fn update_affect_state(prev_reward: f32, prev_smooth: f32, current_reward: f32) -> (f32, f32, f32, f32) {
    let prediction_error = current_reward - prev_reward;
    let magnitude = prediction_error.abs();
    let smooth = (0.8 * prev_smooth + 0.2 * magnitude.min(1.0)).clamp(0.0, 1.0);
    (magnitude, current_reward, smooth, prediction_error)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectiveExperience {
    pub valence: f32,
    pub arousal: f32,
    pub prediction_delta_magnitude: f32,
    pub predictive_delta_smooth: f32,
    pub health_norm: f32,
    pub time_norm: f32,
    pub resources_norm: f32,
    pub action_type_one_hot: Vec<f32>,
    pub action_name: String,
    pub outcome_reward: f32,
    pub prediction_error: f32,
    pub is_positive_outcome: bool,
}

impl AffectiveExperience {
    /// Clustering vector: affect(4) + vitality(3) + one-hot action + outcome(3)
    pub fn vector(&self) -> Vec<f32> {
        let mut v = Vec::with_capacity(10 + self.action_type_one_hot.len());
        v.extend_from_slice(&[
            self.valence,
            self.arousal,
            self.prediction_delta_magnitude,
            self.predictive_delta_smooth,
            self.health_norm,
            self.time_norm,
            self.resources_norm,
        ]);
        v.extend_from_slice(&self.action_type_one_hot);
        v.extend_from_slice(&[
            self.outcome_reward,
            self.prediction_error,
            if self.is_positive_outcome { 1.0 } else { 0.0 },
        ]);
        v
    }

    pub fn summary(&self) -> String {
        format!(
            "(Action: {}, Reward: {:.1}, Valence: {:.2}, Arousal: {:.2})",
            self.action_name, self.outcome_reward, self.valence, self.arousal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedEmotion {
    pub centroid: Vec<f32>,
    pub samples: Vec<AffectiveExperience>,
    pub count: usize,
}

/// Number of clusters for a buffer of `n` experiences
pub fn emotion_cluster_count(n: usize, min_data: usize) -> usize {
    let divisor = (min_data / 4).max(1);
    (n / divisor).clamp(2, 5)
}

/// Cluster `buffer` and name each cluster through `name_cluster`
///
/// Returns `None` when there is too little data to cluster. Naming failures
/// fall back to `"unnamed"`; duplicate names get `_1`, `_2` suffixes.
pub fn discover_emotions<R, F>(
    buffer: &[AffectiveExperience],
    min_data: usize,
    rng: &mut R,
    mut name_cluster: F,
) -> Option<BTreeMap<String, LearnedEmotion>>
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> Result<String>,
{
    if buffer.len() < min_data.max(1) {
        return None;
    }
    let k = emotion_cluster_count(buffer.len(), min_data);
    if buffer.len() < k {
        return None;
    }

    let vectors: Vec<Vec<f32>> = buffer.iter().map(AffectiveExperience::vector).collect();
    let result = match KMeans::new(k, 0).fit(&vectors) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("Emotion clustering skipped: {}", e);
            return None;
        }
    };

    let mut clusters = BTreeMap::new();
    for (cluster, centroid) in result.centroids.iter().enumerate() {
        let mut members = result.members(cluster);
        if members.is_empty() {
            continue;
        }
        let count = members.len();
        members.shuffle(rng);
        let samples: Vec<AffectiveExperience> = members.iter().take(5).map(|&i| buffer[i].clone()).collect();

        let summaries: Vec<String> = samples.iter().map(AffectiveExperience::summary).collect();
        let prompt = prompts::emotion_naming(&summaries.join("; "));
        let name = match name_cluster(&prompt) {
            Ok(raw) => {
                let cleaned = prompts::clean_label(&raw);
                if cleaned.is_empty() {
                    UNNAMED_CLUSTER.to_string()
                } else {
                    cleaned
                }
            }
            Err(e) => {
                tracing::warn!("Emotion cluster naming failed: {}", e);
                UNNAMED_CLUSTER.to_string()
            }
        };

        let mut unique = name.clone();
        let mut suffix = 1;
        while clusters.contains_key(&unique) {
            unique = format!("{}_{}", name, suffix);
            suffix += 1;
        }

        clusters.insert(
            unique,
            LearnedEmotion {
                centroid: centroid.clone(),
                samples,
                count,
            },
        );
    }

    Some(clusters)
}

/// Name of the learned emotion whose centroid is nearest to `experience`
pub fn emotion_from_affect(experience: &AffectiveExperience, learned: &BTreeMap<String, LearnedEmotion>) -> String {
    let vector = experience.vector();
    let mut best: Option<(&str, f32)> = None;
    for (name, emotion) in learned {
        if emotion.centroid.len() != vector.len() {
            continue;
        }
        let d = distance_squared(&vector, &emotion.centroid);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((name, d)),
        }
    }
    best.map(|(name, _)| name.to_string())
        .unwrap_or_else(|| UNKNOWN_EMOTION.to_string())
}
