//! Collaborator interfaces
//!
//! The engine and the cognitive systems only see these traits. A world
//! package supplies the implementations: how actions are generated and
//! chosen, how state is encoded, what counts as vitality, and so on.

use ahash::AHashMap;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;

use crate::actions::{ActionPlan, Intent};
use crate::cognition::identity::MultiDomainIdentity;
use crate::cognition::utility::UtilityNetwork;
use crate::core::config::ArlaConfig;
use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::components::*;
use crate::ecs::events::ReflectionContext;
use crate::ecs::state::SimulationState;

pub type Position = (i32, i32);

pub type Details = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Decision pipeline
// ============================================================================

/// Populates a fresh state with the scenario's entities and environment
pub trait ScenarioLoader {
    fn load(&self, state: &mut SimulationState) -> Result<()>;
}

pub trait ActionGenerator {
    fn generate(&self, state: &SimulationState, entity_id: &EntityId, tick: Tick) -> Vec<ActionPlan>;
}

pub trait DecisionSelector {
    /// `None` means the entity sits this tick out
    fn select(&self, state: &mut SimulationState, entity_id: &EntityId, candidates: &[ActionPlan]) -> Option<ActionPlan>;
}

// ============================================================================
// World queries
// ============================================================================

/// Spatial structure of the world
pub trait Environment: fmt::Debug {
    fn valid_positions(&self) -> Vec<Position>;
    fn neighbors(&self, position: Position) -> Vec<Position>;
    fn distance(&self, a: Position, b: Position) -> f32;
    fn can_move(&self, from: Position, to: Position) -> bool;
    fn is_valid_position(&self, position: Position) -> bool;
    fn position_of(&self, entity_id: &EntityId) -> Option<Position>;
    fn entities_at(&self, position: Position) -> Vec<EntityId>;
    fn entities_in_radius(&self, center: Position, radius: i32) -> Vec<(EntityId, Position)>;
    fn update_entity_position(&mut self, entity_id: &EntityId, new_position: Position);
    fn remove_entity(&mut self, entity_id: &EntityId);
    fn to_value(&self) -> serde_json::Value;
    fn restore(&mut self, data: &serde_json::Value) -> Result<()>;
}

pub trait PerceptionProvider {
    /// Refresh every agent's `PerceptionComponent`
    fn update_perception(&self, state: &mut SimulationState, tick: Tick);
}

pub trait RewardCalculator {
    /// Final subjective reward plus a breakdown for logging
    fn calculate_final_reward(
        &self,
        state: &SimulationState,
        entity_id: &EntityId,
        base_reward: f32,
        action_id: &str,
        intent: Intent,
        outcome_details: &Details,
    ) -> (f32, Details);
}

pub trait StateEncoder {
    /// Length of every vector `encode_state` returns
    fn state_dim(&self) -> usize;

    fn encode_state(&self, state: &SimulationState, entity_id: &EntityId, target: Option<&EntityId>) -> Vec<f32>;

    fn encode_internal_state(&self, state: &SimulationState, entity_id: &EntityId, config: &ArlaConfig) -> Vec<f32> {
        let dims = &config.agent.cognitive.embeddings;
        state.internal_state_features(entity_id, dims.main_embedding_dim, dims.identity_dim)
    }
}

/// Length of the default internal state vector
pub fn internal_state_dim(config: &ArlaConfig) -> usize {
    let dims = &config.agent.cognitive.embeddings;
    4 + dims.main_embedding_dim + 5 * dims.identity_dim + 3
}

pub trait StateNodeEncoder {
    /// Generalised symbolic description of the entity's situation
    fn encode_state_for_causal_graph(&self, state: &SimulationState, entity_id: &EntityId) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VitalityMetrics {
    pub health_norm: f32,
    pub time_norm: f32,
    pub resources_norm: f32,
}

pub trait VitalityMetricsProvider {
    fn normalized_vitality_metrics(&self, state: &SimulationState, entity_id: &EntityId) -> VitalityMetrics;
}

pub trait ControllabilityProvider {
    /// Perceived control over outcomes, in [0, 1]
    fn controllability_score(&self, state: &SimulationState, entity_id: &EntityId) -> f32;
}

pub trait NarrativeContextProvider {
    fn narrative_context(&self, state: &SimulationState, entity_id: &EntityId, tick: Tick) -> ReflectionContext;
}

// ============================================================================
// Persistence and reporting
// ============================================================================

pub trait ComponentFactory {
    fn create_component(&self, type_name: &str, data: &serde_json::Value) -> Result<Box<dyn Component>>;
}

type Constructor = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Component>>>;

/// Factory keyed by component tag; each entry rebuilds one type from its data
#[derive(Default)]
pub struct DefaultComponentFactory {
    constructors: AHashMap<String, Constructor>,
}

impl fmt::Debug for DefaultComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("DefaultComponentFactory").field("types", &names).finish()
    }
}

impl DefaultComponentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild `T` straight from its serialized form
    pub fn register<T>(&mut self)
    where
        T: ComponentKind + DeserializeOwned,
    {
        self.register_with(T::NAME, |data| {
            let component: T = serde_json::from_value(data.clone())
                .map_err(|e| ArlaError::ComponentFactory(format!("{}: {}", T::NAME, e)))?;
            Ok(Box::new(component))
        });
    }

    pub fn register_with<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Component>> + 'static,
    {
        self.constructors.insert(type_name.to_string(), Box::new(constructor));
    }

    /// Every core component; the Q-learning network is rebuilt fresh with
    /// `(state_dim, internal_dim, action_dim)` since only its scalars persist
    pub fn with_core_components(config: &ArlaConfig, q_dims: (usize, usize, usize)) -> Self {
        let mut factory = Self::new();
        factory.register::<TimeBudgetComponent>();
        factory.register::<ActionPlanComponent>();
        factory.register::<ActionOutcomeComponent>();
        factory.register::<PerceptionComponent>();
        factory.register::<EmotionComponent>();
        factory.register::<AffectComponent>();
        factory.register::<GoalComponent>();
        factory.register::<IdentityComponent>();
        factory.register::<MemoryComponent>();
        factory.register::<ValidationComponent>();
        factory.register::<CompetenceComponent>();
        factory.register::<EpisodeComponent>();
        factory.register::<BeliefSystemComponent>();
        factory.register::<SocialMemoryComponent>();
        factory.register::<ValueSystemComponent>();

        let alpha = config.learning.q_learning.alpha;
        let seed = config.simulation.random_seed;
        factory.register_with(QLearningComponent::NAME, move |data| {
            let mut component: QLearningComponent = serde_json::from_value(data.clone())
                .map_err(|e| ArlaError::ComponentFactory(format!("{}: {}", QLearningComponent::NAME, e)))?;
            let (state_dim, internal_dim, action_dim) = q_dims;
            component.utility_network = Some(UtilityNetwork::new(state_dim, internal_dim, action_dim, alpha, seed));
            Ok(Box::new(component))
        });
        factory
    }

    pub fn knows(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }
}

impl ComponentFactory for DefaultComponentFactory {
    fn create_component(&self, type_name: &str, data: &serde_json::Value) -> Result<Box<dyn Component>> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| ArlaError::ComponentFactory(format!("unknown component type '{}'", type_name)))?;
        constructor(data)
    }
}

/// Fresh cognitive components for a new agent
pub fn cognitive_components(
    config: &ArlaConfig,
    identity: MultiDomainIdentity,
    utility_network: UtilityNetwork,
) -> Vec<Box<dyn Component>> {
    let memory = &config.learning.memory;
    let dims = &config.agent.cognitive.embeddings;
    vec![
        Box::new(EmotionComponent::default()),
        Box::new(AffectComponent::new(memory.affective_buffer_maxlen)),
        Box::new(GoalComponent::new(dims.main_embedding_dim)),
        Box::new(IdentityComponent::new(identity)),
        Box::new(MemoryComponent::new(memory.short_term_memory_maxlen)),
        Box::new(ValidationComponent::default()),
        Box::new(CompetenceComponent::default()),
        Box::new(EpisodeComponent::default()),
        Box::new(BeliefSystemComponent::default()),
        Box::new(SocialMemoryComponent::new(dims.main_embedding_dim)),
        Box::new(ValueSystemComponent::default()),
        Box::new(ActionOutcomeComponent::default()),
        Box::new(QLearningComponent::new(utility_network, config.learning.q_learning.initial_epsilon)),
    ]
}

pub type Metrics = BTreeMap<String, f64>;

/// Receives what the logging and metrics systems emit; every method is
/// optional
pub trait Exporter {
    fn log_event(&self, _tick: Tick, _topic: &str, _payload: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn export_metrics(&self, _tick: Tick, _metrics: &Metrics) -> Result<()> {
        Ok(())
    }

    fn log_learning_curve(&self, _entity_id: &EntityId, _tick: Tick, _loss: f32) -> Result<()> {
        Ok(())
    }

    fn log_agent_state(&self, _entity_id: &EntityId, _tick: Tick, _components: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

pub trait MetricsCalculator {
    fn name(&self) -> &str;
    fn calculate(&self, state: &SimulationState) -> Result<Metrics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rebuilds_registered_types() {
        let config = ArlaConfig::new();
        let factory = DefaultComponentFactory::with_core_components(&config, (3, 4, 5));

        let emotion = serde_json::to_value(EmotionComponent::default()).unwrap();
        let rebuilt = factory.create_component("EmotionComponent", &emotion).unwrap();
        assert_eq!(rebuilt.type_name(), "EmotionComponent");
        assert_eq!(rebuilt.to_value(), emotion);

        let q = serde_json::json!({"current_epsilon": 0.05, "last_loss": null});
        let rebuilt = factory.create_component("QLearningComponent", &q).unwrap();
        let q = rebuilt.downcast_ref::<QLearningComponent>().unwrap();
        assert_eq!(q.utility_network.as_ref().unwrap().dims(), (3, 4, 5));
    }

    #[test]
    fn test_factory_errors() {
        let factory = DefaultComponentFactory::with_core_components(&ArlaConfig::new(), (1, 1, 1));
        assert!(matches!(
            factory.create_component("Nope", &serde_json::Value::Null),
            Err(ArlaError::ComponentFactory(_))
        ));
        assert!(matches!(
            factory.create_component("EmotionComponent", &serde_json::json!({"valence": "x"})),
            Err(ArlaError::ComponentFactory(_))
        ));
    }

    #[test]
    fn test_internal_state_dim_matches_layout() {
        let config = ArlaConfig::new();
        assert_eq!(internal_state_dim(&config), 4 + 32 + 5 * 32 + 3);
    }
}
