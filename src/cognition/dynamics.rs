//! Temporal emotion dynamics
//!
//! New emotion = decay * current + learning_rate * appraised target + noise,
//! then clipped to valence [-1, 1] and arousal [0, 1].

use rand::Rng;

use crate::cognition::appraisal::{AppraisalDimensions, AppraisalProcessor, SocialContext};
use crate::core::config::EmotionalDynamicsSection;
use crate::core::math::{clamp_finite, gaussian};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionUpdate {
    pub valence: f32,
    pub arousal: f32,
    pub appraisal: Option<AppraisalDimensions>,
    pub target_valence: f32,
    pub target_arousal: f32,
}

#[derive(Debug, Clone)]
pub struct EmotionalDynamics {
    valence_decay: f32,
    arousal_decay: f32,
    valence_learning_rate: f32,
    arousal_learning_rate: f32,
    noise_std: f32,
    processor: AppraisalProcessor,
}

impl EmotionalDynamics {
    pub fn new(config: &EmotionalDynamicsSection) -> Self {
        Self {
            valence_decay: config.temporal.valence_decay_rate,
            arousal_decay: config.temporal.arousal_decay_rate,
            valence_learning_rate: config.temporal.valence_learning_rate,
            arousal_learning_rate: config.temporal.arousal_learning_rate,
            noise_std: config.noise_std,
            processor: AppraisalProcessor::new(config.appraisal_weights.clone()),
        }
    }

    pub fn processor(&self) -> &AppraisalProcessor {
        &self.processor
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_emotion_with_appraisal<R: Rng + ?Sized>(
        &self,
        current_valence: f32,
        current_arousal: f32,
        prediction_error: f32,
        current_goal: Option<&str>,
        action_success: bool,
        social_context: &SocialContext,
        controllability_estimate: f32,
        rng: &mut R,
    ) -> EmotionUpdate {
        let appraisal = self.processor.appraise_event(
            prediction_error,
            current_goal,
            action_success,
            social_context,
            controllability_estimate,
        );
        let target_valence = self.processor.valence(&appraisal);
        let target_arousal = self.processor.arousal(&appraisal, prediction_error);

        let mut update = self.apply_targets(
            current_valence,
            current_arousal,
            target_valence,
            target_arousal,
            rng,
        );
        update.appraisal = Some(appraisal);
        update
    }

    /// Blend explicit targets into the current state
    pub fn apply_targets<R: Rng + ?Sized>(
        &self,
        current_valence: f32,
        current_arousal: f32,
        target_valence: f32,
        target_arousal: f32,
        rng: &mut R,
    ) -> EmotionUpdate {
        let valence = self.valence_decay * current_valence
            + self.valence_learning_rate * target_valence
            + gaussian(rng, self.noise_std);
        let arousal = self.arousal_decay * current_arousal
            + self.arousal_learning_rate * target_arousal
            + gaussian(rng, self.noise_std);

        EmotionUpdate {
            valence: clamp_finite(valence, -1.0, 1.0),
            arousal: clamp_finite(arousal, 0.0, 1.0),
            appraisal: None,
            target_valence,
            target_arousal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn silent() -> EmotionalDynamics {
        let mut config = EmotionalDynamicsSection::default();
        config.noise_std = 0.0;
        EmotionalDynamics::new(&config)
    }

    #[test]
    fn test_zero_noise_is_deterministic() {
        let dynamics = silent();
        let social = SocialContext::default();
        let mut rng_a = ChaCha8Rng::seed_from_u64(1);
        let mut rng_b = ChaCha8Rng::seed_from_u64(999);
        let a = dynamics.update_emotion_with_appraisal(0.1, 0.4, 2.0, Some("g"), true, &social, 0.5, &mut rng_a);
        let b = dynamics.update_emotion_with_appraisal(0.1, 0.4, 2.0, Some("g"), true, &social, 0.5, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_extreme_targets_are_clipped() {
        let mut config = EmotionalDynamicsSection::default();
        config.noise_std = 0.0;
        config.temporal.valence_decay_rate = 1.0;
        config.temporal.valence_learning_rate = 1.0;
        config.temporal.arousal_decay_rate = 1.0;
        config.temporal.arousal_learning_rate = 1.0;
        let dynamics = EmotionalDynamics::new(&config);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let update = dynamics.apply_targets(0.5, 0.5, 2.0, 3.0, &mut rng);
        assert_eq!(update.valence, 1.0);
        assert_eq!(update.arousal, 1.0);
        let update = dynamics.apply_targets(-0.5, 0.0, -2.0, -3.0, &mut rng);
        assert_eq!(update.valence, -1.0);
        assert_eq!(update.arousal, 0.0);
    }

    #[test]
    fn test_blend_uses_decay_and_learning_rate() {
        let dynamics = silent();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let update = dynamics.apply_targets(0.5, 0.5, 1.0, 1.0, &mut rng);
        assert!((update.valence - (0.9 * 0.5 + 0.1)).abs() < 1e-6);
        assert!((update.arousal - (0.85 * 0.5 + 0.15)).abs() < 1e-6);
    }
}
