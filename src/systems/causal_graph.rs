//! Per-agent causal learning
//!
//! Two structures grow from every `action_executed` event:
//! - a symbolic graph `previous state -> outcome node -> current state`
//!   whose edge weights accumulate, decay every `decay_interval` ticks and
//!   are pruned below `prune_threshold`;
//! - a flat list of `(state, action, reward)` records. Every
//!   `refit_interval` ticks, once `min_samples` records exist, a
//!   backdoor-adjusted model is refit on them and checked by the refuters.

use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::cognition::causal::{link_weight, node_key, outcome_node, CausalModel, CausalModelValidator, CausalRecord};
use crate::core::config::{ArlaConfig, CausalSection};
use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{EmotionComponent, MemoryComponent, ValidationComponent};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::StateNodeEncoder;

pub struct CausalGraphSystem {
    settings: CausalSection,
    seed: u64,
    encoder: Box<dyn StateNodeEncoder>,
    /// State node of each agent before its next action
    pre_action_nodes: RefCell<AHashMap<EntityId, Vec<String>>>,
}

impl CausalGraphSystem {
    const REQUIRED: &'static [&'static str] = &[MemoryComponent::NAME];

    pub fn new(state: &SimulationState, config: &ArlaConfig, encoder: Box<dyn StateNodeEncoder>) -> Rc<Self> {
        let system = Rc::new(Self {
            settings: config.learning.causal.clone(),
            seed: config.simulation.random_seed,
            encoder,
            pre_action_nodes: RefCell::new(AHashMap::new()),
        });
        let this = Rc::clone(&system);
        state
            .event_bus()
            .subscribe(topics::ACTION_EXECUTED, move |state, event| this.on_action_executed(state, event));
        system
    }

    fn on_action_executed(&self, state: &mut SimulationState, event: &Event) -> Result<()> {
        let Event::ActionExecuted {
            entity_id, plan, outcome, ..
        } = event
        else {
            return Ok(());
        };
        if !state.has_component::<MemoryComponent>(entity_id) {
            return Ok(());
        }

        let current = self.encoder.encode_state_for_causal_graph(state, entity_id);
        let previous = self.pre_action_nodes.borrow_mut().remove(entity_id);
        let arousal = state
            .get_component::<EmotionComponent>(entity_id)
            .map_or(0.0, |e| e.arousal);
        let weight = link_weight(outcome.reward, arousal);
        let outcome_key = outcome_node(&plan.action_id, outcome.success);
        let current_key = node_key(&current);

        // The first action of an agent has no recorded pre-state; the
        // post-action state stands in for it
        let record_state = previous.as_deref().unwrap_or(&current);
        let record = CausalRecord::from_state_node(record_state, &plan.action_id, outcome.reward);

        let memory = state.require_mut::<MemoryComponent>(entity_id)?;
        if let Some(previous) = &previous {
            memory.causal_graph.add_edge(&node_key(previous), &outcome_key, weight);
        }
        memory.causal_graph.add_edge(&outcome_key, &current_key, weight);
        memory.causal_data.push(record);

        self.pre_action_nodes.borrow_mut().insert(entity_id.clone(), current);
        Ok(())
    }

    /// Interventional mean reward of `action_id` for this agent, if a model
    /// has been fitted and has seen the action
    pub fn estimate_causal_effect(&self, state: &SimulationState, entity_id: &EntityId, action_id: &str) -> Option<f32> {
        state
            .get_component::<MemoryComponent>(entity_id)?
            .causal_model
            .as_ref()?
            .estimate(action_id)
    }

    fn refit(&self, state: &mut SimulationState, entity_id: &EntityId, tick: Tick) -> Result<()> {
        let (model, confidence) = {
            let Some(memory) = state.get_component::<MemoryComponent>(entity_id) else {
                return Ok(());
            };
            if memory.causal_data.len() < self.settings.min_samples {
                return Ok(());
            }
            let model = match CausalModel::fit(&memory.causal_data) {
                Ok(model) => model,
                Err(e) => {
                    tracing::warn!("Causal refit for {} at tick {} failed: {}", entity_id, tick, e);
                    return Ok(());
                }
            };
            let confidence = CausalModelValidator::new(&model, &memory.causal_data, self.seed ^ tick)
                .check_robustness()
                .confidence();
            (model, confidence)
        };

        tracing::debug!(
            "{} causal model refit on {} samples, confidence {:.2}",
            entity_id,
            model.samples,
            confidence
        );
        state.require_mut::<MemoryComponent>(entity_id)?.causal_model = Some(model);
        if let Some(validation) = state.get_component_mut::<ValidationComponent>(entity_id) {
            validation.causal_model_confidence = confidence;
        }
        Ok(())
    }
}

impl System for CausalGraphSystem {
    fn name(&self) -> &str {
        "CausalGraphSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        Self::REQUIRED
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        let entities = state.entities_with_components(Self::REQUIRED);

        {
            let mut nodes = self.pre_action_nodes.borrow_mut();
            for entity_id in &entities {
                nodes.insert(entity_id.clone(), self.encoder.encode_state_for_causal_graph(state, entity_id));
            }
        }

        let refit_interval = self.settings.refit_interval.max(1);
        if tick > 0 && tick % refit_interval == 0 {
            for entity_id in &entities {
                self.refit(state, entity_id, tick)?;
            }
        }

        let decay_interval = self.settings.decay_interval.max(1);
        if (tick + 1) % decay_interval == 0 {
            for entity_id in &entities {
                let memory = state.require_mut::<MemoryComponent>(entity_id)?;
                let pruned = memory
                    .causal_graph
                    .decay_and_prune(self.settings.decay_rate, self.settings.prune_threshold);
                if pruned > 0 {
                    tracing::trace!("Pruned {} causal edges for {}", pruned, entity_id);
                }
            }
        }
        Ok(())
    }
}
