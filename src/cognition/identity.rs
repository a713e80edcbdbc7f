//! Multi-domain identity
//!
//! An agent's self-concept is split into five domains, each with its own
//! embedding, confidence and stability. Updates are gated: new trait evidence
//! moves a domain only when its support (consistency with the current
//! embedding plus social validation) clears a threshold that rises with the
//! domain's stability. Established domains therefore resist weakly supported
//! change.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::math::{cosine_similarity, gaussian, l2_norm, normalize};
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::RelationalSchema;
use crate::ecs::events::ReflectionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentityDomain {
    Social,
    Competence,
    Moral,
    Relational,
    Agency,
}

impl IdentityDomain {
    pub const ALL: [IdentityDomain; 5] = [
        IdentityDomain::Social,
        IdentityDomain::Competence,
        IdentityDomain::Moral,
        IdentityDomain::Relational,
        IdentityDomain::Agency,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IdentityDomain::Social => "SOCIAL",
            IdentityDomain::Competence => "COMPETENCE",
            IdentityDomain::Moral => "MORAL",
            IdentityDomain::Relational => "RELATIONAL",
            IdentityDomain::Agency => "AGENCY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        Self::ALL.into_iter().find(|d| d.name() == upper)
    }

    /// How much social feedback counts as evidence in this domain
    fn validation_weight(&self) -> f32 {
        match self {
            IdentityDomain::Social => 0.9,
            IdentityDomain::Competence => 0.6,
            IdentityDomain::Moral => 0.4,
            IdentityDomain::Relational => 0.8,
            IdentityDomain::Agency => 0.3,
        }
    }
}

impl fmt::Display for IdentityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainIdentity {
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub stability: f32,
    pub social_validation: f32,
    pub last_updated: Tick,
}

/// Social signals distilled from relationship schemas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialFeedback {
    pub positive_social_responses: f32,
    pub negative_social_responses: f32,
    pub social_approval_rating: f32,
    pub peer_recognition: f32,
    pub interaction_frequency: f32,
}

/// Diagnostics returned by every update attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub consistency: f32,
    pub social_validation: f32,
    pub resistance: f32,
    pub combined_support: f32,
    pub update_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiDomainIdentity {
    pub embedding_dim: usize,
    pub domains: BTreeMap<IdentityDomain, DomainIdentity>,
}

impl MultiDomainIdentity {
    pub fn new<R: Rng + ?Sized>(embedding_dim: usize, rng: &mut R) -> Self {
        let domains = IdentityDomain::ALL
            .into_iter()
            .map(|domain| {
                let embedding = (0..embedding_dim).map(|_| gaussian(rng, 0.1)).collect();
                (
                    domain,
                    DomainIdentity {
                        embedding,
                        confidence: 0.3,
                        stability: 0.25,
                        social_validation: 0.0,
                        last_updated: 0,
                    },
                )
            })
            .collect();
        Self {
            embedding_dim,
            domains,
        }
    }

    pub fn domain(&self, domain: IdentityDomain) -> Option<&DomainIdentity> {
        self.domains.get(&domain)
    }

    pub fn domain_mut(&mut self, domain: IdentityDomain) -> Option<&mut DomainIdentity> {
        self.domains.get_mut(&domain)
    }

    /// Try to move `domain` toward `new_traits`, taking social validation
    /// from the reflection context
    ///
    /// Returns whether the embedding changed, the consistency score, and the
    /// full set of gate metrics. A refused update leaves the domain untouched.
    pub fn update_domain_identity(
        &mut self,
        domain: IdentityDomain,
        new_traits: &[f32],
        context: &ReflectionContext,
        current_tick: Tick,
    ) -> (bool, f32, ValidationMetrics) {
        let Some(current) = self.domains.get_mut(&domain) else {
            let metrics = ValidationMetrics {
                consistency: 0.0,
                social_validation: 0.0,
                resistance: 0.9,
                combined_support: 0.0,
                update_threshold: 1.0,
            };
            return (false, 0.0, metrics);
        };

        let consistency = assess_consistency(new_traits, &current.embedding, current.confidence);
        let validation = assess_social_validation(context.social_feedback.as_ref(), domain);
        let resistance = (current.stability * 0.4
            + (1.0 - consistency) * 0.5
            + (1.0 - validation) * 0.3
            + current.confidence * 0.2)
            .clamp(0.0, 0.9);

        let update_threshold = 0.3 + current.stability * 0.4;
        let combined_support = consistency * 0.4 + validation * 0.6;

        let mut updated = false;
        if combined_support > update_threshold && new_traits.len() == current.embedding.len() {
            let strength = (combined_support * (1.0 - resistance) * (1.2 - current.confidence)).clamp(0.0, 0.3);
            let step = strength * (1.0 - resistance);
            let moved: Vec<f32> = current
                .embedding
                .iter()
                .zip(new_traits)
                .map(|(e, n)| e + (n - e) * step)
                .collect();
            current.embedding = normalize(&moved);
            current.confidence = (current.confidence + 0.1).min(1.0);
            current.social_validation = validation;
            current.last_updated = current_tick;
            if combined_support > 0.8 {
                current.stability = (current.stability + 0.05).min(1.0);
            }
            updated = true;
        }

        let metrics = ValidationMetrics {
            consistency,
            social_validation: validation,
            resistance,
            combined_support,
            update_threshold,
        };
        (updated, consistency, metrics)
    }

    pub fn domain_embedding(&self, domain: IdentityDomain) -> Vec<f32> {
        self.domains
            .get(&domain)
            .map(|d| d.embedding.clone())
            .unwrap_or_else(|| vec![0.0; self.embedding_dim])
    }

    /// Confidence-weighted mean of the domain embeddings
    pub fn global_embedding(&self) -> Vec<f32> {
        let mut sum = vec![0.0f32; self.embedding_dim];
        let mut total = 0.0f32;
        for d in self.domains.values() {
            if d.embedding.len() != self.embedding_dim {
                continue;
            }
            for (s, e) in sum.iter_mut().zip(&d.embedding) {
                *s += e * d.confidence;
            }
            total += d.confidence;
        }
        if total <= 0.0 {
            return vec![0.0; self.embedding_dim];
        }
        sum.into_iter().map(|s| s / total).collect()
    }

    /// Confidence-weighted mean pairwise similarity, mapped to [0, 1]
    pub fn coherence(&self) -> f32 {
        let domains: Vec<&DomainIdentity> = self.domains.values().collect();
        let mut similarities = Vec::new();
        let mut weights = Vec::new();
        for i in 0..domains.len() {
            for j in (i + 1)..domains.len() {
                let (a, b) = (domains[i], domains[j]);
                if l2_norm(&a.embedding) > 0.0 && l2_norm(&b.embedding) > 0.0 {
                    similarities.push((cosine_similarity(&a.embedding, &b.embedding) + 1.0) / 2.0);
                    weights.push(a.confidence * b.confidence);
                }
            }
        }
        if similarities.is_empty() {
            return 1.0;
        }
        let total: f32 = weights.iter().sum();
        if total == 0.0 {
            return similarities.iter().sum::<f32>() / similarities.len() as f32;
        }
        similarities.iter().zip(&weights).map(|(s, w)| s * w).sum::<f32>() / total
    }

    pub fn stability(&self) -> f32 {
        if self.domains.is_empty() {
            return 0.5;
        }
        self.domains.values().map(|d| d.stability).sum::<f32>() / self.domains.len() as f32
    }
}

fn assess_consistency(new_traits: &[f32], current: &[f32], confidence: f32) -> f32 {
    if confidence < 0.1 {
        return 0.8;
    }
    if l2_norm(new_traits) == 0.0 || l2_norm(current) == 0.0 {
        return 0.5;
    }
    let similarity = (cosine_similarity(new_traits, current) + 1.0) / 2.0;
    similarity.powf(1.0 + confidence).clamp(0.0, 1.0)
}

fn assess_social_validation(feedback: Option<&SocialFeedback>, domain: IdentityDomain) -> f32 {
    let Some(f) = feedback else {
        return 0.3;
    };
    let score = f.positive_social_responses * 0.3 + f.social_approval_rating * 0.4 + f.peer_recognition * 0.3
        - f.negative_social_responses * 0.2;
    let value = domain.validation_weight() * 0.3 + score * 0.7;
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Turns relationship schemas into identity-relevant social feedback
#[derive(Debug, Default)]
pub struct SocialValidationCollector {
    history: BTreeMap<EntityId, Vec<(Tick, SocialFeedback)>>,
}

impl SocialValidationCollector {
    const HISTORY_LEN: usize = 20;

    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the agent has no relationships yet
    pub fn collect(
        &mut self,
        entity_id: &EntityId,
        schemas: &BTreeMap<EntityId, RelationalSchema>,
        current_tick: Tick,
    ) -> Option<SocialFeedback> {
        if schemas.is_empty() {
            return None;
        }

        let mut positive = 0u32;
        let mut negative = 0u32;
        let mut total_valence = 0.0f32;
        let mut recognition = 0.0f32;
        for schema in schemas.values() {
            total_valence += schema.impression_valence;
            if schema.impression_valence > 0.3 {
                positive += schema.interaction_count;
            } else if schema.impression_valence < -0.3 {
                negative += schema.interaction_count;
            }
            recognition += (schema.interaction_count as f32 / 10.0).min(1.0);
        }

        let n = schemas.len() as f32;
        let mut feedback = SocialFeedback::default();
        let total = positive + negative;
        if total > 0 {
            feedback.positive_social_responses = positive as f32 / total as f32;
            feedback.negative_social_responses = negative as f32 / total as f32;
        }
        feedback.social_approval_rating = ((total_valence / n + 1.0) / 2.0).clamp(0.0, 1.0);
        feedback.peer_recognition = (recognition / n).min(1.0);
        feedback.interaction_frequency = (n / 5.0).min(1.0);

        let history = self.history.entry(entity_id.clone()).or_default();
        history.push((current_tick, feedback.clone()));
        if history.len() > Self::HISTORY_LEN {
            let excess = history.len() - Self::HISTORY_LEN;
            history.drain(..excess);
        }

        Some(feedback)
    }

    pub fn history(&self, entity_id: &EntityId) -> &[(Tick, SocialFeedback)] {
        self.history.get(entity_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
