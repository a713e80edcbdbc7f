//! Sandbox actions and the executor that runs them
//!
//! `forage` and `rest` are solitary. `share` gives one resource to a nearby
//! agent and `spar` fights one; both take a `target_agent_id` parameter.

use rand::Rng;
use std::rc::Rc;

use crate::actions::{Action, ActionOutcome, ActionParams, ActionPlan, ActionRegistry, Intent};
use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::SocialMemoryComponent;
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::sandbox::world::VitalsComponent;

/// Cells within which another agent counts as a partner for `share`/`spar`
pub const INTERACTION_RADIUS: i32 = 2;

pub const FORAGE: &str = "forage";
pub const REST: &str = "rest";
pub const SHARE: &str = "share";
pub const SPAR: &str = "spar";

/// Registry holding the four sandbox actions
pub fn sandbox_registry() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry.register(Box::new(ForageAction))?;
    registry.register(Box::new(RestAction))?;
    registry.register(Box::new(ShareAction))?;
    registry.register(Box::new(SparAction))?;
    Ok(registry)
}

/// Intent a sandbox action is taken with
pub fn intent_of(action_id: &str) -> Intent {
    match action_id {
        SHARE => Intent::Cooperate,
        SPAR => Intent::Compete,
        _ => Intent::Solitary,
    }
}

fn vitals_mut<'a>(state: &'a mut SimulationState, entity_id: &EntityId) -> Result<&'a mut VitalsComponent> {
    state.require_mut::<VitalsComponent>(entity_id)
}

/// Other agents within `INTERACTION_RADIUS` that still have vitals
fn partners(entity_id: &EntityId, state: &SimulationState) -> Vec<EntityId> {
    let Some(env) = state.environment() else {
        return Vec::new();
    };
    let Some(center) = env.position_of(entity_id) else {
        return Vec::new();
    };
    env.entities_in_radius(center, INTERACTION_RADIUS)
        .into_iter()
        .map(|(id, _)| id)
        .filter(|id| id != entity_id && state.has_component::<VitalsComponent>(id))
        .collect()
}

fn target_params(entity_id: &EntityId, state: &SimulationState) -> Vec<ActionParams> {
    partners(entity_id, state)
        .into_iter()
        .map(|id| {
            let mut params = ActionParams::new();
            params.insert("target_agent_id".into(), id.to_string().into());
            params
        })
        .collect()
}

fn target_of(plan: &ActionPlan) -> Result<EntityId> {
    plan.param_str("target_agent_id")
        .map(EntityId::new)
        .ok_or_else(|| ArlaError::InvalidAction(format!("'{}' needs a target_agent_id", plan.action_id)))
}

/// Health of the target relative to the actor, or 0 without a target
fn target_features(entity_id: &EntityId, state: &SimulationState, params: &ActionParams) -> Vec<f32> {
    let target = params.get("target_agent_id").and_then(|v| v.as_str()).map(EntityId::new);
    let own = state.get_component::<VitalsComponent>(entity_id).map_or(0.0, |v| v.health_norm());
    let other = target
        .as_ref()
        .and_then(|t| state.get_component::<VitalsComponent>(t))
        .map_or(0.0, |v| v.health_norm());
    vec![other - own]
}

fn record_interaction(state: &mut SimulationState, a: &EntityId, b: &EntityId, valence_for_a: f32, valence_for_b: f32) {
    if let Some(social) = state.get_component_mut::<SocialMemoryComponent>(a) {
        social.record_interaction(b, valence_for_a);
    }
    if let Some(social) = state.get_component_mut::<SocialMemoryComponent>(b) {
        social.record_interaction(a, valence_for_b);
    }
}

pub struct ForageAction;

impl Action for ForageAction {
    fn action_id(&self) -> &str {
        FORAGE
    }

    fn name(&self) -> &str {
        "Forage"
    }

    fn base_cost(&self, _state: &SimulationState) -> f32 {
        4.0
    }

    fn generate_possible_params(&self, _entity_id: &EntityId, _state: &SimulationState, _tick: Tick) -> Vec<ActionParams> {
        vec![ActionParams::new()]
    }

    fn execute(&self, state: &mut SimulationState, entity_id: &EntityId, _plan: &ActionPlan, _tick: Tick) -> Result<ActionOutcome> {
        let roll: f32 = state.rng().gen();
        let found = if roll < 0.65 { state.rng().gen_range(1..=3) as f32 } else { 0.0 };
        vitals_mut(state, entity_id)?.gain(found);
        if found > 0.0 {
            Ok(ActionOutcome::new(true, format!("found {} food", found), 0.5 * found)
                .with_detail("status", "found_food")
                .with_detail("amount", found))
        } else {
            Ok(ActionOutcome::new(false, "came back empty-handed", -0.3).with_detail("status", "nothing_found"))
        }
    }
}

pub struct RestAction;

impl Action for RestAction {
    fn action_id(&self) -> &str {
        REST
    }

    fn name(&self) -> &str {
        "Rest"
    }

    fn base_cost(&self, _state: &SimulationState) -> f32 {
        2.0
    }

    fn generate_possible_params(&self, _entity_id: &EntityId, _state: &SimulationState, _tick: Tick) -> Vec<ActionParams> {
        vec![ActionParams::new()]
    }

    fn execute(&self, state: &mut SimulationState, entity_id: &EntityId, _plan: &ActionPlan, _tick: Tick) -> Result<ActionOutcome> {
        let vitals = vitals_mut(state, entity_id)?;
        let deficit = 1.0 - vitals.health_norm();
        vitals.heal(10.0);
        Ok(ActionOutcome::new(true, "rested", 0.1 + deficit).with_detail("status", "rested"))
    }
}

pub struct ShareAction;

impl Action for ShareAction {
    fn action_id(&self) -> &str {
        SHARE
    }

    fn name(&self) -> &str {
        "Share"
    }

    fn base_cost(&self, _state: &SimulationState) -> f32 {
        3.0
    }

    fn generate_possible_params(&self, entity_id: &EntityId, state: &SimulationState, _tick: Tick) -> Vec<ActionParams> {
        target_params(entity_id, state)
    }

    fn execute(&self, state: &mut SimulationState, entity_id: &EntityId, plan: &ActionPlan, _tick: Tick) -> Result<ActionOutcome> {
        let target = target_of(plan)?;
        let giver = vitals_mut(state, entity_id)?;
        if giver.resources < 1.0 {
            return Ok(ActionOutcome::new(false, "nothing to share", -0.2)
                .with_detail("status", "nothing_to_share")
                .with_detail("target_agent_id", target.to_string()));
        }
        giver.resources -= 1.0;
        vitals_mut(state, &target)?.gain(1.0);
        record_interaction(state, entity_id, &target, 0.2, 0.3);
        Ok(ActionOutcome::new(true, format!("shared with {}", target), 1.0)
            .with_detail("status", "shared")
            .with_detail("target_agent_id", target.to_string()))
    }

    fn feature_dim(&self) -> usize {
        1
    }

    fn feature_vector(&self, entity_id: &EntityId, state: &SimulationState, params: &ActionParams) -> Vec<f32> {
        target_features(entity_id, state, params)
    }
}

pub struct SparAction;

impl Action for SparAction {
    fn action_id(&self) -> &str {
        SPAR
    }

    fn name(&self) -> &str {
        "Spar"
    }

    fn base_cost(&self, _state: &SimulationState) -> f32 {
        5.0
    }

    fn generate_possible_params(&self, entity_id: &EntityId, state: &SimulationState, _tick: Tick) -> Vec<ActionParams> {
        target_params(entity_id, state)
    }

    fn execute(&self, state: &mut SimulationState, entity_id: &EntityId, plan: &ActionPlan, _tick: Tick) -> Result<ActionOutcome> {
        let target = target_of(plan)?;
        let own = vitals_mut(state, entity_id)?.health;
        let other = vitals_mut(state, &target)?.health;
        let chance = if own + other > 0.0 { own / (own + other) } else { 0.5 };
        let won = state.rng().gen::<f32>() < chance;

        let (winner, loser) = if won { (entity_id, &target) } else { (&target, entity_id) };
        vitals_mut(state, loser)?.harm(10.0);
        vitals_mut(state, winner)?.gain(1.0);
        let (for_actor, for_target) = if won { (0.1, -0.3) } else { (-0.3, 0.1) };
        record_interaction(state, entity_id, &target, for_actor, for_target);

        let outcome = if won {
            ActionOutcome::new(true, format!("beat {}", target), 1.5).with_detail("status", "victory")
        } else {
            ActionOutcome::new(false, format!("lost to {}", target), -1.0).with_detail("status", "defeat")
        };
        Ok(outcome.with_detail("target_agent_id", target.to_string()))
    }

    fn feature_dim(&self) -> usize {
        1
    }

    fn feature_vector(&self, entity_id: &EntityId, state: &SimulationState, params: &ActionParams) -> Vec<f32> {
        target_features(entity_id, state, params)
    }
}

/// Performs every registered action when the action system asks for it and
/// reports back with `action_outcome_ready`
pub struct ActionExecutor;

impl ActionExecutor {
    pub fn install(state: &SimulationState, registry: Rc<ActionRegistry>) {
        let bus = state.event_bus();
        for action_id in registry.ids() {
            let registry = Rc::clone(&registry);
            bus.subscribe(topics::execute_action(action_id), move |state, event| {
                let Event::ExecuteAction { entity_id, plan, tick } = event else {
                    return Ok(());
                };
                let action = registry
                    .get(&plan.action_id)
                    .ok_or_else(|| ArlaError::InvalidAction(format!("unknown action '{}'", plan.action_id)))?;
                let outcome = action.execute(state, entity_id, plan, *tick)?;
                state.publish(Event::ActionOutcomeReady {
                    entity_id: entity_id.clone(),
                    plan: plan.clone(),
                    outcome,
                    tick: *tick,
                });
                Ok(())
            });
        }
    }
}
