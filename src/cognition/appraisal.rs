//! Cognitive appraisal of action outcomes
//!
//! Each event is scored on six appraisal dimensions (goal relevance,
//! congruence, agency, controllability, certainty, social approval), which
//! are then folded into a target valence and arousal. Every dimension is a
//! clipped, deterministic function of its inputs.

use serde::{Deserialize, Serialize};

use crate::actions::Intent;
use crate::core::config::AppraisalWeights;
use crate::core::math::clamp_finite;

/// Who else was around when the action happened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialContext {
    pub other_agents_present: bool,
    pub action_intent: Option<Intent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppraisalDimensions {
    /// [0, 1]
    pub goal_relevance: f32,
    /// [-1, 1]
    pub goal_congruence: f32,
    /// [0, 1]
    pub agency: f32,
    /// [0, 1]
    pub controllability: f32,
    /// [0, 1]
    pub certainty: f32,
    /// [-1, 1]
    pub social_approval: f32,
}

#[derive(Debug, Clone)]
pub struct AppraisalProcessor {
    weights: AppraisalWeights,
}

impl AppraisalProcessor {
    pub fn new(weights: AppraisalWeights) -> Self {
        Self { weights }
    }

    pub fn appraise_event(
        &self,
        prediction_error: f32,
        current_goal: Option<&str>,
        action_success: bool,
        social_context: &SocialContext,
        controllability_estimate: f32,
    ) -> AppraisalDimensions {
        let pe = sanitize(prediction_error);
        let estimate = clamp_finite(controllability_estimate, 0.0, 1.0);

        AppraisalDimensions {
            goal_relevance: goal_relevance(pe, current_goal, action_success),
            goal_congruence: goal_congruence(pe, action_success),
            agency: agency(action_success, estimate),
            controllability: controllability(pe, social_context),
            certainty: certainty(pe),
            social_approval: social_approval(social_context),
        }
    }

    pub fn valence(&self, a: &AppraisalDimensions) -> f32 {
        let primary = a.goal_congruence * a.goal_relevance * self.weights.goal_relevance;
        let agency_boost = a.agency * 0.3 * self.weights.agency;
        let control_boost = a.controllability * 0.2;
        let social_boost = a.social_approval * 0.4 * self.weights.social_feedback;
        clamp_finite(primary + agency_boost + control_boost + social_boost, -1.0, 1.0)
    }

    pub fn arousal(&self, a: &AppraisalDimensions, prediction_error: f32) -> f32 {
        let error_arousal = (sanitize(prediction_error).abs() / 5.0).min(1.0);
        let relevance_multiplier = 1.0 + a.goal_relevance;
        let uncertainty_boost = (1.0 - a.certainty) * 0.5;
        let control_stress = (1.0 - a.controllability) * 0.3;
        clamp_finite(
            error_arousal * relevance_multiplier + uncertainty_boost + control_stress,
            0.0,
            1.0,
        )
    }
}

/// Large or non-finite errors saturate every formula the same way
fn sanitize(pe: f32) -> f32 {
    if pe.is_nan() {
        0.0
    } else {
        pe.clamp(-1.0e6, 1.0e6)
    }
}

fn goal_relevance(pe: f32, current_goal: Option<&str>, success: bool) -> f32 {
    if current_goal.map_or(true, str::is_empty) {
        return 0.3;
    }
    let mut relevance = (pe.abs() / 10.0).min(1.0);
    if success && pe > 0.0 {
        relevance *= 1.2;
    } else if !success && pe < 0.0 {
        relevance *= 1.1;
    }
    clamp_finite(relevance, 0.0, 1.0)
}

fn goal_congruence(pe: f32, success: bool) -> f32 {
    if success && pe > 0.0 {
        (pe / 5.0).min(1.0)
    } else if !success && pe < 0.0 {
        (pe / 5.0).max(-1.0)
    } else {
        0.0
    }
}

fn agency(success: bool, controllability_estimate: f32) -> f32 {
    let base = if success { 0.7 } else { 0.3 };
    clamp_finite(base * controllability_estimate, 0.0, 1.0)
}

fn controllability(pe: f32, social: &SocialContext) -> f32 {
    let error_factor = (1.0 - pe.abs() / 10.0).max(0.2);
    let social_factor = if social.other_agents_present { 0.8 } else { 1.0 };
    clamp_finite(error_factor * social_factor, 0.0, 1.0)
}

fn certainty(pe: f32) -> f32 {
    (1.0 - pe.abs() / 5.0).max(0.1)
}

fn social_approval(social: &SocialContext) -> f32 {
    if !social.other_agents_present {
        return 0.0;
    }
    match social.action_intent {
        Some(Intent::Cooperate) => 0.6,
        Some(Intent::Compete) => -0.3,
        _ => 0.0,
    }
}
