//! Temporal-difference learning of action utilities
//!
//! `update` caches each active agent's encoded state; the next
//! `action_executed` for that agent trains the utility network on
//! `r + gamma * max_a' Q(s', a')` using the cached state as `s`.

use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::actions::{ActionPlan, ActionRegistry};
use crate::core::config::{ArlaConfig, QLearningSection};
use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{
    AffectComponent, EmotionComponent, GoalComponent, IdentityComponent, QLearningComponent, TimeBudgetComponent,
};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::StateEncoder;
use crate::systems::causal_graph::CausalGraphSystem;

pub struct QLearningSystem {
    config: Rc<ArlaConfig>,
    settings: QLearningSection,
    registry: Rc<ActionRegistry>,
    encoder: Box<dyn StateEncoder>,
    causal: Option<Rc<CausalGraphSystem>>,
    previous_states: RefCell<AHashMap<EntityId, Vec<f32>>>,
}

impl QLearningSystem {
    const REQUIRED: &'static [&'static str] = &[
        TimeBudgetComponent::NAME,
        QLearningComponent::NAME,
        IdentityComponent::NAME,
        AffectComponent::NAME,
        GoalComponent::NAME,
        EmotionComponent::NAME,
    ];

    pub fn new(
        state: &SimulationState,
        config: Rc<ArlaConfig>,
        registry: Rc<ActionRegistry>,
        encoder: Box<dyn StateEncoder>,
        causal: Option<Rc<CausalGraphSystem>>,
    ) -> Rc<Self> {
        let system = Rc::new(Self {
            settings: config.learning.q_learning.clone(),
            config,
            registry,
            encoder,
            causal,
            previous_states: RefCell::new(AHashMap::new()),
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
                } => this.learn(state, entity_id, plan, outcome.reward, *tick),
                _ => Ok(()),
            });
        system
    }

    fn learn(&self, state: &mut SimulationState, entity_id: &EntityId, plan: &ActionPlan, reward: f32, tick: Tick) -> Result<()> {
        if !Self::REQUIRED.iter().all(|name| state.has_component_named(entity_id, name)) {
            return Ok(());
        }
        let Some(old_state) = self.previous_states.borrow().get(entity_id).cloned() else {
            tracing::trace!("{} has no cached state yet, skipping learning", entity_id);
            return Ok(());
        };

        let target_agent = plan.param_str("target_agent_id").map(EntityId::new);
        let new_state = self.encoder.encode_state(state, entity_id, target_agent.as_ref());
        let internal = self.encoder.encode_internal_state(state, entity_id, &self.config);
        let action_features = self.registry.encode_plan(entity_id, state, plan);

        let reward = match self
            .causal
            .as_ref()
            .and_then(|c| c.estimate_causal_effect(state, entity_id, &plan.action_id))
        {
            Some(effect) => {
                let b = self.settings.causal_blend;
                (1.0 - b) * reward + b * effect
            }
            None => reward,
        };

        let max_next_q = self.max_next_q(state, entity_id, &new_state, &internal, tick);
        let target = reward + self.settings.gamma * max_next_q;

        let component = state.require_mut::<QLearningComponent>(entity_id)?;
        let Some(network) = component.utility_network.as_mut() else {
            tracing::warn!("{} has no utility network", entity_id);
            return Ok(());
        };
        let loss = network.train_step(&old_state, &internal, &action_features, target);
        component.last_loss = Some(loss);
        component.decay_epsilon(self.settings.epsilon_decay_rate, self.settings.min_epsilon);

        tracing::trace!(
            "{} q-update for '{}': target {:.3}, loss {:.4}",
            entity_id,
            plan.action_id,
            target,
            loss
        );
        state.publish(Event::QLearningUpdate {
            entity_id: entity_id.clone(),
            loss,
            tick,
        });
        Ok(())
    }

    /// Best predicted utility over every plan the agent could take next; 0
    /// when nothing is available
    fn max_next_q(&self, state: &SimulationState, entity_id: &EntityId, next_state: &[f32], internal: &[f32], tick: Tick) -> f32 {
        let Some(network) = state
            .get_component::<QLearningComponent>(entity_id)
            .and_then(|q| q.utility_network.as_ref())
        else {
            return 0.0;
        };

        let mut best: Option<f32> = None;
        for action in self.registry.iter() {
            for params in action.generate_possible_params(entity_id, state, tick) {
                let plan = ActionPlan::new(action.action_id()).with_params(params);
                let features = self.registry.encode_plan(entity_id, state, &plan);
                let q = network.predict(next_state, internal, &features);
                best = Some(best.map_or(q, |b| b.max(q)));
            }
        }
        best.unwrap_or(0.0)
    }
}

impl System for QLearningSystem {
    fn name(&self) -> &str {
        "QLearningSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        Self::REQUIRED
    }

    fn update(&self, state: &mut SimulationState, _tick: Tick) -> Result<()> {
        let mut cache = self.previous_states.borrow_mut();
        for entity_id in state.entities_with_components(Self::REQUIRED) {
            let active = state
                .get_component::<TimeBudgetComponent>(&entity_id)
                .is_some_and(|b| b.is_active);
            if active {
                let encoded = self.encoder.encode_state(state, &entity_id, None);
                cache.insert(entity_id, encoded);
            } else {
                cache.remove(&entity_id);
            }
        }
        Ok(())
    }
}
