//! Appraisal-driven emotion updates and emotion discovery

use std::rc::Rc;

use crate::actions::{ActionOutcome, ActionPlan, ActionRegistry};
use crate::cognition::affect::{discover_emotions, emotion_from_affect, update_affect_state, AffectiveExperience};
use crate::cognition::appraisal::SocialContext;
use crate::cognition::dynamics::EmotionalDynamics;
use crate::core::config::ArlaConfig;
use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{AffectComponent, EmotionComponent, GoalComponent, PerceptionComponent};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::llm::prompts::purpose;
use crate::llm::scaffold::CognitiveScaffold;
use crate::providers::{ControllabilityProvider, VitalityMetricsProvider};

/// Multiplicative dissonance decay applied every tick
const DISSONANCE_DECAY: f32 = 0.99;

pub struct AffectSystem {
    dynamics: EmotionalDynamics,
    emotion_cluster_min_data: usize,
    registry: Rc<ActionRegistry>,
    scaffold: Rc<CognitiveScaffold>,
    vitality: Box<dyn VitalityMetricsProvider>,
    controllability: Box<dyn ControllabilityProvider>,
}

impl AffectSystem {
    const REQUIRED: &'static [&'static str] = &[AffectComponent::NAME, EmotionComponent::NAME, GoalComponent::NAME];

    pub fn new(
        state: &SimulationState,
        config: &ArlaConfig,
        registry: Rc<ActionRegistry>,
        scaffold: Rc<CognitiveScaffold>,
        vitality: Box<dyn VitalityMetricsProvider>,
        controllability: Box<dyn ControllabilityProvider>,
    ) -> Rc<Self> {
        let system = Rc::new(Self {
            dynamics: EmotionalDynamics::new(&config.agent.emotional_dynamics),
            emotion_cluster_min_data: config.learning.memory.emotion_cluster_min_data,
            registry,
            scaffold,
            vitality,
            controllability,
        });
        let this = Rc::clone(&system);
        state
            .event_bus()
            .subscribe(topics::ACTION_EXECUTED, move |state, event| match event {
                Event::ActionExecuted {
                    entity_id,
                    plan,
                    outcome,
                    tick,
                    ..
                } => this.on_action_executed(state, entity_id, plan, outcome, *tick),
                _ => Ok(()),
            });
        system
    }

    fn on_action_executed(
        &self,
        state: &mut SimulationState,
        entity_id: &EntityId,
        plan: &ActionPlan,
        outcome: &ActionOutcome,
        tick: Tick,
    ) -> Result<()> {
        if !Self::REQUIRED.iter().all(|c| state.has_component_named(entity_id, c)) {
            return Ok(());
        }

        let (prev_reward, prev_smooth) = {
            let affect = state.require_mut::<AffectComponent>(entity_id)?;
            (affect.prev_reward, affect.predictive_delta_smooth)
        };
        let (magnitude, new_prev_reward, smooth, prediction_error) =
            update_affect_state(prev_reward, prev_smooth, outcome.reward);

        let goal = state
            .get_component::<GoalComponent>(entity_id)
            .and_then(|g| g.current_symbolic_goal.clone());
        let social = SocialContext {
            other_agents_present: state
                .get_component::<PerceptionComponent>(entity_id)
                .map_or(false, |p| !p.visible_entities.is_empty()),
            action_intent: Some(plan.intent),
        };
        let controllability = self.controllability.controllability_score(state, entity_id);
        let vitality = self.vitality.normalized_vitality_metrics(state, entity_id);
        let (valence, arousal) = state
            .get_component::<EmotionComponent>(entity_id)
            .map(|e| (e.valence, e.arousal))
            .unwrap_or((0.0, 0.5));

        let update = self.dynamics.update_emotion_with_appraisal(
            valence,
            arousal,
            prediction_error,
            goal.as_deref(),
            outcome.success,
            &social,
            controllability,
            state.rng(),
        );

        let experience = AffectiveExperience {
            valence: update.valence,
            arousal: update.arousal,
            prediction_delta_magnitude: magnitude,
            predictive_delta_smooth: smooth,
            health_norm: vitality.health_norm,
            time_norm: vitality.time_norm,
            resources_norm: vitality.resources_norm,
            action_type_one_hot: self.registry.one_hot(&plan.action_id),
            action_name: plan.action_id.clone(),
            outcome_reward: outcome.reward,
            prediction_error,
            is_positive_outcome: outcome.reward > 0.0,
        };

        let ready_buffer = {
            let affect = state.require_mut::<AffectComponent>(entity_id)?;
            affect.prev_reward = new_prev_reward;
            affect.predictive_delta_smooth = smooth;
            affect.prediction_delta_magnitude = magnitude;
            affect.push_experience(experience.clone());
            (affect.affective_experience_buffer.len() >= self.emotion_cluster_min_data)
                .then(|| affect.affective_experience_buffer.iter().cloned().collect::<Vec<_>>())
        };

        if let Some(buffer) = ready_buffer {
            self.discover(state, entity_id, &buffer, tick)?;
        }

        let category = {
            let affect = state.require_mut::<AffectComponent>(entity_id)?;
            emotion_from_affect(&experience, &affect.learned_emotion_clusters)
        };
        let emotion = state.require_mut::<EmotionComponent>(entity_id)?;
        emotion.valence = update.valence;
        emotion.arousal = update.arousal;
        emotion.current_emotion_category = category;
        Ok(())
    }

    /// Replace learned clusters from a full buffer, then start a new one
    fn discover(&self, state: &mut SimulationState, entity_id: &EntityId, buffer: &[AffectiveExperience], tick: Tick) -> Result<()> {
        let scaffold = &self.scaffold;
        let clusters = discover_emotions(buffer, self.emotion_cluster_min_data, state.rng(), |prompt| {
            scaffold.query(entity_id, purpose::EMOTION_NAMING, prompt, tick)
        });

        let affect = state.require_mut::<AffectComponent>(entity_id)?;
        if let Some(clusters) = clusters {
            tracing::info!(
                "{} learned {} emotions at tick {}: {:?}",
                entity_id,
                clusters.len(),
                tick,
                clusters.keys().collect::<Vec<_>>()
            );
            affect.learned_emotion_clusters = clusters;
        }
        affect.affective_experience_buffer.clear();
        Ok(())
    }
}

impl System for AffectSystem {
    fn name(&self) -> &str {
        "AffectSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        Self::REQUIRED
    }

    fn update(&self, state: &mut SimulationState, _tick: Tick) -> Result<()> {
        for entity_id in state.entities_with_components(Self::REQUIRED) {
            if let Some(affect) = state.get_component_mut::<AffectComponent>(&entity_id) {
                affect.cognitive_dissonance *= DISSONANCE_DECAY;
            }
        }
        Ok(())
    }
}
