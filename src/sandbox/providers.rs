//! Sandbox implementations of the collaborator interfaces

use serde_json::json;

use crate::actions::Intent;
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::{
    GoalComponent, MemoryComponent, PerceptionComponent, SocialMemoryComponent, TimeBudgetComponent,
    ValueSystemComponent,
};
use crate::ecs::events::ReflectionContext;
use crate::ecs::state::SimulationState;
use crate::providers::{
    ControllabilityProvider, Details, NarrativeContextProvider, RewardCalculator, StateEncoder, StateNodeEncoder,
    VitalityMetrics, VitalityMetricsProvider,
};
use crate::sandbox::world::VitalsComponent;

/// Applies the agent's value multipliers as bonuses on top of the base reward
#[derive(Debug, Default)]
pub struct SandboxRewardCalculator;

impl RewardCalculator for SandboxRewardCalculator {
    fn calculate_final_reward(
        &self,
        state: &SimulationState,
        entity_id: &EntityId,
        base_reward: f32,
        _action_id: &str,
        intent: Intent,
        outcome_details: &Details,
    ) -> (f32, Details) {
        let mut breakdown = Details::new();
        breakdown.insert("base".into(), json!(base_reward));
        let Some(values) = state.get_component::<ValueSystemComponent>(entity_id) else {
            breakdown.insert("final".into(), json!(base_reward));
            return (base_reward, breakdown);
        };

        let mut reward = base_reward;
        if intent == Intent::Cooperate {
            let bonus = base_reward * (values.collaboration_multiplier - 1.0);
            reward += bonus;
            breakdown.insert("collaboration_bonus".into(), json!(bonus));
        }
        let status = outcome_details.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status.contains("victory") {
            let bonus = base_reward * (values.combat_victory_multiplier - 1.0);
            reward += bonus;
            breakdown.insert("combat_bonus".into(), json!(bonus));
        }
        breakdown.insert("final".into(), json!(reward));
        (reward, breakdown)
    }
}

fn time_norm(state: &SimulationState, entity_id: &EntityId) -> f32 {
    state
        .get_component::<TimeBudgetComponent>(entity_id)
        .filter(|b| b.max_time_budget > 0.0)
        .map_or(0.0, |b| (b.current_time_budget / b.max_time_budget).clamp(0.0, 1.0))
}

fn impression(state: &SimulationState, entity_id: &EntityId, other: &EntityId) -> f32 {
    state
        .get_component::<SocialMemoryComponent>(entity_id)
        .and_then(|s| s.schemas.get(other))
        .map_or(0.0, |s| s.impression_valence)
}

/// Own vitals, the visible crowd, and the target of the plan if any
#[derive(Debug, Default)]
pub struct SandboxStateEncoder;

impl SandboxStateEncoder {
    pub const DIM: usize = 8;
}

impl StateEncoder for SandboxStateEncoder {
    fn state_dim(&self) -> usize {
        Self::DIM
    }

    fn encode_state(&self, state: &SimulationState, entity_id: &EntityId, target: Option<&EntityId>) -> Vec<f32> {
        let mut features = Vec::with_capacity(Self::DIM);
        let vitals = state.get_component::<VitalsComponent>(entity_id);
        features.push(vitals.map_or(0.0, |v| v.health_norm()));
        features.push(time_norm(state, entity_id));
        features.push(vitals.map_or(0.0, |v| v.resources_norm()));

        let visible: Vec<&EntityId> = state
            .get_component::<PerceptionComponent>(entity_id)
            .map(|p| p.visible_entities.keys().collect())
            .unwrap_or_default();
        features.push((visible.len().min(4) as f32) / 4.0);
        let mean_impression = if visible.is_empty() {
            0.0
        } else {
            visible.iter().map(|o| impression(state, entity_id, o)).sum::<f32>() / visible.len() as f32
        };
        features.push(mean_impression);

        match target {
            Some(target) => {
                features.push(1.0);
                features.push(
                    state
                        .get_component::<VitalsComponent>(target)
                        .map_or(0.0, |v| v.health_norm()),
                );
                features.push(impression(state, entity_id, target));
            }
            None => features.extend([0.0; 3]),
        }
        features
    }
}

/// Symbolic situation for the causal graph: health, stores and company
#[derive(Debug, Default)]
pub struct SandboxNodeEncoder;

impl StateNodeEncoder for SandboxNodeEncoder {
    fn encode_state_for_causal_graph(&self, state: &SimulationState, entity_id: &EntityId) -> Vec<String> {
        let (health, resources) = state
            .get_component::<VitalsComponent>(entity_id)
            .map_or((0.0, 0.0), |v| (v.health_norm(), v.resources_norm()));
        let health = match health {
            h if h > 0.7 => "high_health",
            h if h > 0.3 => "medium_health",
            _ => "low_health",
        };
        let resources = if resources >= 0.25 { "well_stocked" } else { "scarce_resources" };
        let company = match state.get_component::<PerceptionComponent>(entity_id) {
            Some(p) if !p.visible_entities.is_empty() => "in_company",
            _ => "alone",
        };
        vec!["STATE".into(), health.into(), resources.into(), company.into()]
    }
}

#[derive(Debug, Default)]
pub struct SandboxVitality;

impl VitalityMetricsProvider for SandboxVitality {
    fn normalized_vitality_metrics(&self, state: &SimulationState, entity_id: &EntityId) -> VitalityMetrics {
        let vitals = state.get_component::<VitalsComponent>(entity_id);
        VitalityMetrics {
            health_norm: vitals.map_or(0.0, |v| v.health_norm()),
            time_norm: time_norm(state, entity_id),
            resources_norm: vitals.map_or(0.0, |v| v.resources_norm()),
        }
    }
}

/// Half recent success rate, half physical condition
#[derive(Debug, Default)]
pub struct SandboxControllability;

impl ControllabilityProvider for SandboxControllability {
    fn controllability_score(&self, state: &SimulationState, entity_id: &EntityId) -> f32 {
        let success_rate = state
            .get_component::<MemoryComponent>(entity_id)
            .filter(|m| !m.short_term_memory.is_empty())
            .map_or(0.5, |m| {
                let wins = m.short_term_memory.iter().filter(|e| e.success).count();
                wins as f32 / m.short_term_memory.len() as f32
            });
        let condition = state
            .get_component::<VitalsComponent>(entity_id)
            .map_or(0.5, |v| 0.5 * v.health_norm() + 0.5 * (v.resources / 10.0).clamp(0.0, 1.0));
        (0.5 * success_rate + 0.5 * condition).clamp(0.0, 1.0)
    }
}

/// First-person account of the agent's condition and recent actions
#[derive(Debug, Default)]
pub struct SandboxNarrative;

impl NarrativeContextProvider for SandboxNarrative {
    fn narrative_context(&self, state: &SimulationState, entity_id: &EntityId, tick: Tick) -> ReflectionContext {
        let mut narrative = format!("At tick {} ", tick);
        let mut context = ReflectionContext::default();

        match state.get_component::<VitalsComponent>(entity_id) {
            Some(v) => {
                narrative.push_str(&format!(
                    "my health is {:.0} of {:.0} and I carry {:.0} resources.",
                    v.health, v.max_health, v.resources
                ));
                context.extras.insert("health_level".into(), json!(v.health_norm()));
                context.extras.insert("resource_level".into(), json!(v.resources));
            }
            None => narrative.push_str("I cannot tell how I am doing."),
        }
        if let Some(pos) = state.environment().and_then(|env| env.position_of(entity_id)) {
            narrative.push_str(&format!(" I am at {:?}.", pos));
            context.extras.insert("position".into(), json!([pos.0, pos.1]));
        }
        if let Some(goal) = state
            .get_component::<GoalComponent>(entity_id)
            .and_then(|g| g.current_symbolic_goal.as_deref())
        {
            narrative.push_str(&format!(" My goal is to {}.", goal));
        }
        if let Some(memory) = state.get_component::<MemoryComponent>(entity_id) {
            let recent: Vec<String> = memory
                .short_term_memory
                .iter()
                .map(|e| format!("{} with reward {:.2}", e.summary(), e.outcome))
                .collect();
            if !recent.is_empty() {
                narrative.push_str(" Recently: ");
                narrative.push_str(&recent.join("; "));
                narrative.push('.');
            }
        }
        context.narrative = narrative;
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::MemoryEntry;

    fn agent(state: &mut SimulationState, name: &str) -> EntityId {
        let id = EntityId::new(name);
        state.add_entity(id.clone()).unwrap();
        state.add_component(&id, VitalsComponent::new(100.0, 5.0)).unwrap();
        state.add_component(&id, TimeBudgetComponent::new(50.0)).unwrap();
        id
    }

    fn details(status: &str) -> Details {
        let mut d = Details::new();
        d.insert("status".into(), json!(status));
        d
    }

    #[test]
    fn test_reward_multipliers_apply_as_bonuses() {
        let mut state = SimulationState::new(0);
        let id = agent(&mut state, "a");
        let calc = SandboxRewardCalculator;

        let (reward, breakdown) = calc.calculate_final_reward(&state, &id, 2.0, "share", Intent::Cooperate, &details("shared"));
        assert_eq!(reward, 2.0, "no value system, no change");
        assert!(!breakdown.contains_key("collaboration_bonus"));

        let mut values = ValueSystemComponent::default();
        values.collaboration_multiplier = 1.5;
        values.combat_victory_multiplier = 2.0;
        state.add_component(&id, values).unwrap();

        let (reward, breakdown) = calc.calculate_final_reward(&state, &id, 2.0, "share", Intent::Cooperate, &details("shared"));
        assert!((reward - 3.0).abs() < 1e-6);
        assert_eq!(breakdown["collaboration_bonus"], json!(1.0));

        let (reward, _) = calc.calculate_final_reward(&state, &id, 1.5, "spar", Intent::Compete, &details("victory"));
        assert!((reward - 3.0).abs() < 1e-6);
        let (reward, _) = calc.calculate_final_reward(&state, &id, -1.0, "spar", Intent::Compete, &details("defeat"));
        assert_eq!(reward, -1.0);
    }

    #[test]
    fn test_state_encoding_layout() {
        let mut state = SimulationState::new(0);
        let a = agent(&mut state, "a");
        let b = agent(&mut state, "b");
        state.get_component_mut::<VitalsComponent>(&b).unwrap().health = 50.0;

        let encoder = SandboxStateEncoder;
        let alone = encoder.encode_state(&state, &a, None);
        assert_eq!(alone.len(), encoder.state_dim());
        assert_eq!(alone[0], 1.0);
        assert_eq!(alone[1], 0.5);
        assert_eq!(alone[2], 0.25);
        assert_eq!(&alone[5..], &[0.0, 0.0, 0.0]);

        let targeted = encoder.encode_state(&state, &a, Some(&b));
        assert_eq!(targeted[5], 1.0);
        assert_eq!(targeted[6], 0.5);
    }

    #[test]
    fn test_node_encoding_buckets() {
        let mut state = SimulationState::new(0);
        let a = agent(&mut state, "a");
        state.get_component_mut::<VitalsComponent>(&a).unwrap().health = 20.0;
        let nodes = SandboxNodeEncoder.encode_state_for_causal_graph(&state, &a);
        assert_eq!(nodes, vec!["STATE", "low_health", "well_stocked", "alone"]);
    }

    #[test]
    fn test_controllability_defaults_without_history() {
        let mut state = SimulationState::new(0);
        let a = agent(&mut state, "a");
        // success 0.5, condition 0.5 * 1.0 + 0.5 * 0.5
        let score = SandboxControllability.controllability_score(&state, &a);
        assert!((score - 0.625).abs() < 1e-6);
    }

    #[test]
    fn test_narrative_mentions_rewards() {
        let mut state = SimulationState::new(0);
        let a = agent(&mut state, "a");
        let mut memory = MemoryComponent::new(5);
        memory.short_term_memory.push_back(MemoryEntry {
            tick: 3,
            event_id: "e".into(),
            action_id: "forage".into(),
            intent: Intent::Solitary,
            success: true,
            outcome: 1.5,
            status: "found_food".into(),
        });
        state.add_component(&a, memory).unwrap();

        let context = SandboxNarrative.narrative_context(&state, &a, 4);
        assert!(context.narrative.starts_with("At tick 4 my health is 100 of 100"));
        assert!(context.narrative.contains("Action 'forage' led to outcome 'found_food' with reward 1.50"));
        assert_eq!(context.extras["resource_level"], json!(5.0));
    }
}
