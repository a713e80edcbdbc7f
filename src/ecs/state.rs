//! ECS data store
//!
//! `SimulationState` owns every entity and its components, the current tick,
//! the seeded RNG, the environment, and a handle to the event bus. Each
//! entity holds at most one component per type tag.

use ahash::AHashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, SimulationId, Tick};
use crate::ecs::component::{Component, ComponentKind};
use crate::ecs::components::{AffectComponent, EmotionComponent, GoalComponent, IdentityComponent};
use crate::ecs::event_bus::EventBus;
use crate::ecs::events::Event;
use crate::providers::{ComponentFactory, Environment};
use crate::simulation::snapshot::{AgentSnapshot, ComponentSnapshot, SimulationSnapshot};

use crate::cognition::identity::IdentityDomain;

type ComponentMap = AHashMap<&'static str, Box<dyn Component>>;

pub struct SimulationState {
    pub simulation_id: SimulationId,
    pub current_tick: Tick,
    entities: BTreeMap<EntityId, ComponentMap>,
    event_bus: Rc<EventBus>,
    rng: ChaCha8Rng,
    environment: Option<Box<dyn Environment>>,
}

impl fmt::Debug for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationState")
            .field("simulation_id", &self.simulation_id)
            .field("current_tick", &self.current_tick)
            .field("entities", &self.entities.len())
            .field("environment", &self.environment)
            .finish()
    }
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            simulation_id: SimulationId::generate(),
            current_tick: 0,
            entities: BTreeMap::new(),
            event_bus: Rc::new(EventBus::new()),
            rng: ChaCha8Rng::seed_from_u64(seed),
            environment: None,
        }
    }

    // === Events ===

    pub fn event_bus(&self) -> Rc<EventBus> {
        Rc::clone(&self.event_bus)
    }

    /// Publish on this state's bus; returns the number of handlers that succeeded
    pub fn publish(&mut self, event: Event) -> usize {
        let bus = Rc::clone(&self.event_bus);
        bus.publish(self, &event)
    }

    // === Shared resources ===

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn set_environment(&mut self, environment: Box<dyn Environment>) {
        self.environment = Some(environment);
    }

    pub fn environment(&self) -> Option<&dyn Environment> {
        self.environment.as_deref()
    }

    pub fn environment_mut(&mut self) -> Option<&mut (dyn Environment + 'static)> {
        self.environment.as_deref_mut()
    }

    // === Entities ===

    pub fn add_entity(&mut self, entity_id: EntityId) -> Result<()> {
        if self.entities.contains_key(&entity_id) {
            return Err(ArlaError::DuplicateEntity(entity_id));
        }
        self.entities.insert(entity_id, ComponentMap::default());
        Ok(())
    }

    /// Drop the entity with all of its components
    pub fn remove_entity(&mut self, entity_id: &EntityId) -> bool {
        let removed = self.entities.remove(entity_id).is_some();
        if removed {
            if let Some(env) = self.environment.as_mut() {
                env.remove_entity(entity_id);
            }
        }
        removed
    }

    pub fn has_entity(&self, entity_id: &EntityId) -> bool {
        self.entities.contains_key(entity_id)
    }

    /// Sorted entity ids
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities owning every listed component type, in id order; an empty
    /// list selects every entity
    pub fn entities_with_components(&self, types: &[&str]) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, components)| types.iter().all(|t| components.contains_key(*t)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    // === Components ===

    /// Attach `component`, replacing any existing component of the same type
    pub fn add_component<T: ComponentKind>(&mut self, entity_id: &EntityId, component: T) -> Result<()> {
        self.add_boxed_component(entity_id, Box::new(component))
    }

    pub fn add_boxed_component(&mut self, entity_id: &EntityId, component: Box<dyn Component>) -> Result<()> {
        let components = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| ArlaError::EntityNotFound(entity_id.clone()))?;
        components.insert(component.type_name(), component);
        Ok(())
    }

    pub fn remove_component<T: ComponentKind>(&mut self, entity_id: &EntityId) -> bool {
        self.entities
            .get_mut(entity_id)
            .map_or(false, |components| components.remove(T::NAME).is_some())
    }

    pub fn get_component<T: ComponentKind>(&self, entity_id: &EntityId) -> Option<&T> {
        self.entities.get(entity_id)?.get(T::NAME)?.downcast_ref::<T>()
    }

    pub fn get_component_mut<T: ComponentKind>(&mut self, entity_id: &EntityId) -> Option<&mut T> {
        self.entities.get_mut(entity_id)?.get_mut(T::NAME)?.downcast_mut::<T>()
    }

    /// Like `get_component_mut` but a missing component is an error
    pub fn require_mut<T: ComponentKind>(&mut self, entity_id: &EntityId) -> Result<&mut T> {
        if !self.has_entity(entity_id) {
            return Err(ArlaError::EntityNotFound(entity_id.clone()));
        }
        self.get_component_mut::<T>(entity_id)
            .ok_or_else(|| ArlaError::missing_component(entity_id, T::NAME))
    }

    pub fn has_component<T: ComponentKind>(&self, entity_id: &EntityId) -> bool {
        self.has_component_named(entity_id, T::NAME)
    }

    pub fn has_component_named(&self, entity_id: &EntityId, type_name: &str) -> bool {
        self.entities
            .get(entity_id)
            .map_or(false, |components| components.contains_key(type_name))
    }

    /// Components of one entity sorted by type tag
    pub fn components_of(&self, entity_id: &EntityId) -> Vec<&dyn Component> {
        let mut components: Vec<&dyn Component> = self
            .entities
            .get(entity_id)
            .map(|c| c.values().map(|b| b.as_ref()).collect())
            .unwrap_or_default();
        components.sort_by_key(|c| c.type_name());
        components
    }

    // === Validation ===

    /// Run every component's checks; with `auto_fix` each failing component
    /// gets a repair attempt and is re-validated
    pub fn validate_all(&mut self, auto_fix: bool) -> BTreeMap<EntityId, Vec<String>> {
        let mut report = BTreeMap::new();
        for (entity_id, components) in self.entities.iter_mut() {
            let mut errors = Vec::new();
            let mut names: Vec<&'static str> = components.keys().copied().collect();
            names.sort_unstable();
            for name in names {
                let Some(component) = components.get_mut(name) else {
                    continue;
                };
                let mut found = component.validate(entity_id);
                if !found.is_empty() && auto_fix && component.auto_fix(entity_id) {
                    tracing::debug!("Auto-fixed {} on {}", name, entity_id);
                    found = component.validate(entity_id);
                }
                errors.extend(found.into_iter().map(|e| format!("{}: {}", name, e)));
            }
            if !errors.is_empty() {
                report.insert(entity_id.clone(), errors);
            }
        }
        report
    }

    // === Derived features ===

    /// Cognitive state as a flat vector: affect(4), current goal embedding,
    /// five identity domain embeddings, then presence flags for each block
    pub fn internal_state_features(&self, entity_id: &EntityId, goal_dim: usize, identity_dim: usize) -> Vec<f32> {
        let mut features = Vec::with_capacity(4 + goal_dim + 5 * identity_dim + 3);
        let mut flags = [0.0f32; 3];

        match (
            self.get_component::<EmotionComponent>(entity_id),
            self.get_component::<AffectComponent>(entity_id),
        ) {
            (Some(emotion), Some(affect)) => {
                features.extend_from_slice(&[
                    emotion.valence,
                    emotion.arousal,
                    affect.prediction_delta_magnitude,
                    affect.predictive_delta_smooth,
                ]);
                flags[0] = 1.0;
            }
            _ => features.extend_from_slice(&[0.0; 4]),
        }

        match self
            .get_component::<GoalComponent>(entity_id)
            .and_then(GoalComponent::current_goal)
        {
            Some(goal) => {
                extend_fitted(&mut features, &goal.embedding, goal_dim);
                flags[1] = 1.0;
            }
            None => features.extend(std::iter::repeat(0.0).take(goal_dim)),
        }

        match self.get_component::<IdentityComponent>(entity_id) {
            Some(identity) => {
                for domain in IdentityDomain::ALL {
                    let embedding = identity.multi_domain_identity.domain_embedding(domain);
                    extend_fitted(&mut features, &embedding, identity_dim);
                }
                flags[2] = 1.0;
            }
            None => features.extend(std::iter::repeat(0.0).take(5 * identity_dim)),
        }

        features.extend_from_slice(&flags);
        features
    }

    // === Snapshots ===

    pub fn to_snapshot(&self) -> SimulationSnapshot {
        let agents = self
            .entities
            .keys()
            .map(|entity_id| AgentSnapshot {
                agent_id: entity_id.to_string(),
                components: self
                    .components_of(entity_id)
                    .into_iter()
                    .map(|c| ComponentSnapshot {
                        component_type: c.type_name().to_string(),
                        data: c.to_value(),
                    })
                    .collect(),
            })
            .collect();

        SimulationSnapshot {
            simulation_id: self.simulation_id.to_string(),
            current_tick: self.current_tick,
            agents,
            environment_state: self.environment.as_ref().map(|env| env.to_value()),
        }
    }

    /// Replace entities, tick and environment with the snapshot's contents.
    /// Components the factory cannot build are logged and skipped.
    pub fn restore_snapshot(&mut self, snapshot: &SimulationSnapshot, factory: &dyn ComponentFactory) -> Result<()> {
        if let (Some(env), Some(data)) = (self.environment.as_mut(), snapshot.environment_state.as_ref()) {
            env.restore(data)?;
        }

        self.entities.clear();
        self.simulation_id = SimulationId(snapshot.simulation_id.clone());
        self.current_tick = snapshot.current_tick;

        for agent in &snapshot.agents {
            let entity_id = EntityId::new(agent.agent_id.clone());
            self.add_entity(entity_id.clone())?;
            for stored in &agent.components {
                match factory.create_component(&stored.component_type, &stored.data) {
                    Ok(component) => self.add_boxed_component(&entity_id, component)?,
                    Err(e) => tracing::warn!(
                        "Skipping {} for {} while restoring snapshot: {}",
                        stored.component_type,
                        entity_id,
                        e
                    ),
                }
            }
        }

        tracing::info!(
            "Restored {} entities at tick {} from snapshot",
            self.entities.len(),
            self.current_tick
        );
        Ok(())
    }

    pub fn from_snapshot(snapshot: &SimulationSnapshot, factory: &dyn ComponentFactory, seed: u64) -> Result<Self> {
        let mut state = Self::new(seed);
        state.restore_snapshot(snapshot, factory)?;
        Ok(state)
    }
}

fn extend_fitted(out: &mut Vec<f32>, values: &[f32], dim: usize) {
    out.extend(values.iter().take(dim));
    out.extend(std::iter::repeat(0.0).take(dim.saturating_sub(values.len())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::{SymbolicGoal, TimeBudgetComponent};
    use crate::providers::DefaultComponentFactory;

    fn id(s: &str) -> EntityId {
        EntityId::new(s)
    }

    #[test]
    fn test_add_entity_twice_fails_without_change() {
        let mut state = SimulationState::new(0);
        state.add_entity(id("a")).unwrap();
        state.add_component(&id("a"), TimeBudgetComponent::new(10.0)).unwrap();
        assert!(matches!(state.add_entity(id("a")), Err(ArlaError::DuplicateEntity(_))));
        assert!(state.has_component::<TimeBudgetComponent>(&id("a")));
        assert_eq!(state.entity_count(), 1);
    }

    #[test]
    fn test_component_on_missing_entity_fails() {
        let mut state = SimulationState::new(0);
        let result = state.add_component(&id("ghost"), EmotionComponent::default());
        assert!(matches!(result, Err(ArlaError::EntityNotFound(_))));
        assert!(!state.has_entity(&id("ghost")));
    }

    #[test]
    fn test_get_component_absent_is_none() {
        let mut state = SimulationState::new(0);
        state.add_entity(id("a")).unwrap();
        assert!(state.get_component::<EmotionComponent>(&id("a")).is_none());
        assert!(state.get_component::<EmotionComponent>(&id("missing")).is_none());
        assert!(matches!(
            state.require_mut::<EmotionComponent>(&id("a")),
            Err(ArlaError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn test_entities_with_components_filters_and_sorts() {
        let mut state = SimulationState::new(0);
        for name in ["c", "a", "b"] {
            state.add_entity(id(name)).unwrap();
        }
        state.add_component(&id("c"), EmotionComponent::default()).unwrap();
        state.add_component(&id("a"), EmotionComponent::default()).unwrap();
        state.add_component(&id("a"), TimeBudgetComponent::new(5.0)).unwrap();

        assert_eq!(
            state.entities_with_components(&[EmotionComponent::NAME]),
            vec![id("a"), id("c")]
        );
        assert_eq!(
            state.entities_with_components(&[EmotionComponent::NAME, TimeBudgetComponent::NAME]),
            vec![id("a")]
        );
        assert_eq!(state.entities_with_components(&[]).len(), 3);
    }

    #[test]
    fn test_remove_entity_cascades() {
        let mut state = SimulationState::new(0);
        state.add_entity(id("a")).unwrap();
        state.add_component(&id("a"), EmotionComponent::default()).unwrap();
        assert!(state.remove_entity(&id("a")));
        assert!(!state.remove_entity(&id("a")));
        assert!(state.get_component::<EmotionComponent>(&id("a")).is_none());
    }

    #[test]
    fn test_validate_all_with_auto_fix() {
        let mut state = SimulationState::new(0);
        state.add_entity(id("a")).unwrap();
        let mut budget = TimeBudgetComponent::new(10.0);
        budget.current_time_budget = -3.0;
        state.add_component(&id("a"), budget).unwrap();

        let report = state.validate_all(false);
        assert!(!report[&id("a")].is_empty());
        let report = state.validate_all(true);
        assert!(report.is_empty());
        let budget = state.get_component::<TimeBudgetComponent>(&id("a")).unwrap();
        assert!(!budget.is_active);
    }

    #[test]
    fn test_internal_state_features_layout() {
        let mut state = SimulationState::new(0);
        state.add_entity(id("a")).unwrap();
        assert_eq!(state.internal_state_features(&id("a"), 2, 3), vec![0.0; 4 + 2 + 15 + 3]);

        state.add_component(&id("a"), EmotionComponent::default()).unwrap();
        state.add_component(&id("a"), AffectComponent::new(4)).unwrap();
        let mut goal = GoalComponent::new(2);
        goal.symbolic_goals.push(SymbolicGoal {
            name: "rest well".into(),
            embedding: vec![0.3, 0.4],
            success_history: vec![1.0],
            last_updated_tick: 0,
        });
        goal.current_symbolic_goal = Some("rest well".into());
        state.add_component(&id("a"), goal).unwrap();

        let features = state.internal_state_features(&id("a"), 2, 3);
        assert_eq!(features.len(), 24);
        assert_eq!(&features[..6], &[0.0, 0.5, 0.0, 0.5, 0.3, 0.4]);
        assert_eq!(&features[21..], &[1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut state = SimulationState::new(0);
        state.current_tick = 7;
        state.add_entity(id("a")).unwrap();
        state.add_component(&id("a"), TimeBudgetComponent::new(50.0)).unwrap();
        state
            .add_component(
                &id("a"),
                EmotionComponent {
                    valence: 0.25,
                    arousal: 0.75,
                    current_emotion_category: "calm".into(),
                },
            )
            .unwrap();

        let snapshot = state.to_snapshot();
        let factory = DefaultComponentFactory::with_core_components(&Default::default(), (1, 1, 1));
        let restored = SimulationState::from_snapshot(&snapshot, &factory, 0).unwrap();

        assert_eq!(restored.current_tick, 7);
        assert_eq!(restored.simulation_id, state.simulation_id);
        assert_eq!(restored.to_snapshot(), snapshot);
    }
}
