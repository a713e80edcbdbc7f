//! Action dispatch and outcome funnel
//!
//! `action_chosen` is re-published as `execute_<id>_action` for the world
//! executor. The executor answers with `action_outcome_ready`; this system
//! settles the reward, cost and bookkeeping and announces `action_executed`,
//! which is the only event the cognitive systems learn from.

use std::rc::Rc;

use crate::actions::{ActionOutcome, ActionPlan, ActionRegistry};
use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::{ActionOutcomeComponent, CompetenceComponent, TimeBudgetComponent};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::RewardCalculator;

pub struct ActionSystem {
    registry: Rc<ActionRegistry>,
    reward_calculator: Box<dyn RewardCalculator>,
}

impl ActionSystem {
    pub fn new(
        state: &SimulationState,
        registry: Rc<ActionRegistry>,
        reward_calculator: Box<dyn RewardCalculator>,
    ) -> Rc<Self> {
        let system = Rc::new(Self {
            registry,
            reward_calculator,
        });
        let bus = state.event_bus();

        let this = Rc::clone(&system);
        bus.subscribe(topics::ACTION_CHOSEN, move |state, event| this.on_action_chosen(state, event));
        let this = Rc::clone(&system);
        bus.subscribe(topics::ACTION_OUTCOME_READY, move |state, event| {
            this.on_outcome_ready(state, event)
        });
        system
    }

    fn on_action_chosen(&self, state: &mut SimulationState, event: &Event) -> Result<()> {
        let Event::ActionChosen { entity_id, plan, tick } = event else {
            return Ok(());
        };
        if self.registry.get(&plan.action_id).is_none() {
            tracing::debug!("Ignoring unregistered action '{}' chosen by {}", plan.action_id, entity_id);
            return Ok(());
        }
        state.publish(Event::ExecuteAction {
            entity_id: entity_id.clone(),
            plan: plan.clone(),
            tick: *tick,
        });
        Ok(())
    }

    fn on_outcome_ready(&self, state: &mut SimulationState, event: &Event) -> Result<()> {
        let Event::ActionOutcomeReady {
            entity_id,
            plan,
            outcome,
            tick,
        } = event
        else {
            return Ok(());
        };
        let executed = self.settle(state, entity_id, plan, outcome, *tick)?;
        state.publish(executed);
        Ok(())
    }

    /// Final reward, cost, competence and outcome component for one outcome
    fn settle(
        &self,
        state: &mut SimulationState,
        entity_id: &EntityId,
        plan: &ActionPlan,
        outcome: &ActionOutcome,
        tick: Tick,
    ) -> Result<Event> {
        if !state.has_entity(entity_id) {
            return Err(ArlaError::EntityNotFound(entity_id.clone()));
        }
        let action = self
            .registry
            .get(&plan.action_id)
            .ok_or_else(|| ArlaError::InvalidAction(format!("unknown action '{}'", plan.action_id)))?;
        let cost = action.base_cost(state);

        let (final_reward, breakdown) = self.reward_calculator.calculate_final_reward(
            state,
            entity_id,
            outcome.base_reward,
            &plan.action_id,
            plan.intent,
            &outcome.details,
        );

        let event_id = uuid::Uuid::new_v4().to_string();
        let mut outcome = outcome.clone();
        outcome.reward = final_reward;
        outcome
            .details
            .insert("reward_breakdown".into(), serde_json::Value::Object(breakdown));
        outcome.details.insert("event_id".into(), event_id.clone().into());

        if let Some(budget) = state.get_component_mut::<TimeBudgetComponent>(entity_id) {
            budget.spend(&plan.action_id, cost);
        }
        if let Some(competence) = state.get_component_mut::<CompetenceComponent>(entity_id) {
            competence.increment(&plan.action_id);
        }
        state.add_component(
            entity_id,
            ActionOutcomeComponent {
                success: outcome.success,
                reward: outcome.reward,
                details: outcome.details.clone(),
            },
        )?;

        tracing::debug!(
            "{} executed '{}' at tick {}: reward {:.3} (base {:.3})",
            entity_id,
            plan.action_id,
            tick,
            outcome.reward,
            outcome.base_reward
        );

        Ok(Event::ActionExecuted {
            event_id,
            entity_id: entity_id.clone(),
            plan: plan.clone(),
            outcome,
            tick,
        })
    }
}

impl System for ActionSystem {
    fn name(&self) -> &str {
        "ActionSystem"
    }

    fn update(&self, _state: &mut SimulationState, _tick: Tick) -> Result<()> {
        Ok(())
    }
}
