//! Event-chain tests on a fully wired sandbox
//!
//! The bus dispatches depth-first on the publisher's stack, so a recorder
//! that subscribes after the systems sees nested events complete innermost
//! first.

use std::cell::RefCell;
use std::rc::Rc;

use arla::actions::ActionPlan;
use arla::core::config::ArlaConfig;
use arla::core::types::EntityId;
use arla::ecs::components::{
    EpisodeComponent, GoalComponent, IdentityComponent, MemoryComponent, TimeBudgetComponent, ValidationComponent,
};
use arla::ecs::events::{topics, Event};
use arla::llm::OfflineLanguageModel;
use arla::sandbox::{build_simulation, SandboxOptions, SandboxSimulation};
use arla::simulation::FileStateStore;

fn sandbox() -> SandboxSimulation {
    let mut config = ArlaConfig::new();
    config.simulation.steps = 20;
    config.simulation.random_seed = 11;
    let options = SandboxOptions {
        agents: 2,
        grid_size: 2,
        ..SandboxOptions::default()
    };
    let out = std::env::temp_dir().join(format!("arla_chain_{}", uuid::Uuid::new_v4()));
    build_simulation(
        config,
        options,
        Box::new(OfflineLanguageModel::new()),
        None,
        Vec::new(),
        Box::new(FileStateStore::new(out)),
    )
    .unwrap()
}

fn record(sim: &SandboxSimulation, topic_list: &[String]) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let bus = sim.manager.state().event_bus();
    for topic in topic_list {
        let seen = Rc::clone(&seen);
        bus.subscribe(topic.clone(), move |_, event| {
            seen.borrow_mut().push(event.topic().to_string());
            Ok(())
        });
    }
    seen
}

fn choose(sim: &mut SandboxSimulation, agent: &EntityId, action_id: &str, tick: u64) {
    sim.manager.state_mut().publish(Event::ActionChosen {
        entity_id: agent.clone(),
        plan: ActionPlan::new(action_id),
        tick,
    });
}

#[test]
fn test_chosen_action_flows_through_executor_to_executed() {
    let mut sim = sandbox();
    let agent = EntityId::new("agent_1");
    let seen = record(
        &sim,
        &[
            topics::ACTION_CHOSEN.to_string(),
            topics::execute_action("rest"),
            topics::ACTION_OUTCOME_READY.to_string(),
            topics::ACTION_EXECUTED.to_string(),
        ],
    );

    choose(&mut sim, &agent, "rest", 0);

    assert_eq!(
        *seen.borrow(),
        vec!["action_executed", "action_outcome_ready", "execute_rest_action", "action_chosen"]
    );
    let state = sim.manager.state();
    let budget = state.get_component::<TimeBudgetComponent>(&agent).unwrap();
    assert_eq!(budget.current_time_budget, 198.0);
    let memory = state.get_component::<MemoryComponent>(&agent).unwrap();
    assert_eq!(memory.episodic_memory.len(), 1);
    assert_eq!(memory.episodic_memory[0].status, "rested");
}

#[test]
fn test_unregistered_action_goes_nowhere() {
    let mut sim = sandbox();
    let agent = EntityId::new("agent_1");
    let seen = record(&sim, &[topics::ACTION_EXECUTED.to_string()]);

    choose(&mut sim, &agent, "teleport", 0);

    assert!(seen.borrow().is_empty());
    let budget = sim.manager.state().get_component::<TimeBudgetComponent>(&agent).unwrap();
    assert_eq!(budget.current_time_budget, 200.0);
}

#[test]
fn test_requested_reflection_publishes_in_order_and_updates_the_self() {
    let mut sim = sandbox();
    let agent = EntityId::new("agent_1");
    for tick in 0..3 {
        choose(&mut sim, &agent, "forage", tick);
    }
    let seen = record(
        &sim,
        &[
            topics::REFLECTION_VALIDATED.to_string(),
            topics::UPDATE_GOALS.to_string(),
            topics::REFLECTION_COMPLETED.to_string(),
        ],
    );

    sim.manager.state_mut().publish(Event::ReflectionRequested {
        entity_id: agent.clone(),
        tick: 3,
        is_final: true,
    });

    assert_eq!(
        *seen.borrow(),
        vec!["reflection_validated", "update_goals_event", "reflection_completed"]
    );

    let state = sim.manager.state();
    let episodes = &state.get_component::<EpisodeComponent>(&agent).unwrap().episodes;
    assert_eq!(episodes.len(), 1);
    let memory = state.get_component::<MemoryComponent>(&agent).unwrap();
    assert!(!memory.last_llm_reflection_summary.is_empty());
    assert!(memory.counterfactual_memories.is_empty(), "final reflections skip counterfactuals");

    let confidence = state
        .get_component::<ValidationComponent>(&agent)
        .unwrap()
        .reflection_confidence_scores[&3];
    assert!((0.0..=1.0).contains(&confidence));

    let goal = state.get_component::<GoalComponent>(&agent).unwrap();
    assert!(goal.current_symbolic_goal.is_some());
    let identity = state.get_component::<IdentityComponent>(&agent).unwrap();
    assert!(!identity.salient_traits_cache.is_empty());
    assert_eq!(identity.last_identity_update_tick, 3);
}

#[test]
fn test_other_agents_are_untouched_by_a_reflection() {
    let mut sim = sandbox();
    let agent = EntityId::new("agent_1");
    let other = EntityId::new("agent_2");
    choose(&mut sim, &agent, "rest", 0);
    sim.manager.state_mut().publish(Event::ReflectionRequested {
        entity_id: agent,
        tick: 1,
        is_final: true,
    });

    let state = sim.manager.state();
    assert!(state.get_component::<EpisodeComponent>(&other).unwrap().episodes.is_empty());
    assert!(state
        .get_component::<IdentityComponent>(&other)
        .unwrap()
        .salient_traits_cache
        .is_empty());
}
