//! End-to-end tests of the engine loop through the action pipeline
//!
//! Each agent takes one fixed-cost action per tick. The cost is only spent
//! once the executor has answered and the action system has settled the
//! outcome, so these runs cover the whole chosen -> executed chain.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use arla::actions::{Action, ActionOutcome, ActionParams, ActionPlan, ActionRegistry, Intent};
use arla::core::config::ArlaConfig;
use arla::core::error::{ArlaError, Result};
use arla::core::types::{EntityId, Tick};
use arla::ecs::components::{ActionOutcomeComponent, CompetenceComponent, TimeBudgetComponent};
use arla::ecs::events::topics;
use arla::ecs::state::SimulationState;
use arla::ecs::system::SystemManager;
use arla::providers::{ActionGenerator, DecisionSelector, Details, RewardCalculator};
use arla::sandbox::ActionExecutor;
use arla::simulation::{RunSummary, SimulationManager, SimulationSnapshot, StateStore};
use arla::systems::ActionSystem;

struct Work;

impl Action for Work {
    fn action_id(&self) -> &str {
        "work"
    }

    fn name(&self) -> &str {
        "Work"
    }

    fn base_cost(&self, _state: &SimulationState) -> f32 {
        10.0
    }

    fn generate_possible_params(&self, _: &EntityId, _: &SimulationState, _: Tick) -> Vec<ActionParams> {
        vec![ActionParams::new()]
    }

    fn execute(&self, _: &mut SimulationState, _: &EntityId, _: &ActionPlan, _: Tick) -> Result<ActionOutcome> {
        Ok(ActionOutcome::new(true, "worked", 1.0).with_detail("status", "done"))
    }
}

struct Doubling;

impl RewardCalculator for Doubling {
    fn calculate_final_reward(
        &self,
        _state: &SimulationState,
        _entity_id: &EntityId,
        base_reward: f32,
        _action_id: &str,
        _intent: Intent,
        _details: &Details,
    ) -> (f32, Details) {
        (base_reward * 2.0, Details::new())
    }
}

struct OnlyWork;

impl ActionGenerator for OnlyWork {
    fn generate(&self, _: &SimulationState, _: &EntityId, _: Tick) -> Vec<ActionPlan> {
        vec![ActionPlan::new("work")]
    }
}

struct First;

impl DecisionSelector for First {
    fn select(&self, _: &mut SimulationState, _: &EntityId, candidates: &[ActionPlan]) -> Option<ActionPlan> {
        candidates.first().cloned()
    }
}

#[derive(Default)]
struct MemoryStore {
    snapshots: Rc<RefCell<Vec<SimulationSnapshot>>>,
}

impl StateStore for MemoryStore {
    fn save(&self, snapshot: &SimulationSnapshot) -> Result<PathBuf> {
        self.snapshots.borrow_mut().push(snapshot.clone());
        Ok(PathBuf::from(format!("memory://{}", snapshot.current_tick)))
    }

    fn load(&self, path: &Path) -> Result<SimulationSnapshot> {
        Err(ArlaError::SnapshotNotFound(path.display().to_string()))
    }
}

struct Run {
    summary: RunSummary,
    manager: SimulationManager,
    executed: Rc<RefCell<u32>>,
    snapshots: Rc<RefCell<Vec<SimulationSnapshot>>>,
}

fn run(agents: &[&str], steps: u64) -> Run {
    let mut config = ArlaConfig::new();
    config.simulation.steps = steps;

    let mut state = SimulationState::new(config.simulation.random_seed);
    for name in agents {
        let id = EntityId::new(*name);
        state.add_entity(id.clone()).unwrap();
        state.add_component(&id, TimeBudgetComponent::new(100.0)).unwrap();
        state.add_component(&id, CompetenceComponent::default()).unwrap();
    }

    let mut registry = ActionRegistry::new();
    registry.register(Box::new(Work)).unwrap();
    let registry = Rc::new(registry);
    ActionExecutor::install(&state, Rc::clone(&registry));
    let mut systems = SystemManager::new();
    systems.register(ActionSystem::new(&state, registry, Box::new(Doubling)));

    let executed = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&executed);
    state.event_bus().subscribe(topics::ACTION_EXECUTED, move |_, _| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    let store = MemoryStore::default();
    let snapshots = Rc::clone(&store.snapshots);
    let mut manager = SimulationManager::new(config, state, systems, Box::new(OnlyWork), Box::new(First), Box::new(store));
    let summary = manager.run().unwrap();
    Run {
        summary,
        manager,
        executed,
        snapshots,
    }
}

fn budget(manager: &SimulationManager, name: &str) -> f32 {
    manager
        .state()
        .get_component::<TimeBudgetComponent>(&EntityId::new(name))
        .unwrap()
        .current_time_budget
}

#[test]
fn test_five_ticks_spend_fifty() {
    let run = run(&["agent_1"], 5);
    assert_eq!(run.summary.final_tick, 4);
    assert_eq!(run.summary.ticks_run, 5);
    assert!(!run.summary.stopped_early);
    assert_eq!(budget(&run.manager, "agent_1"), 50.0);
    assert_eq!(*run.executed.borrow(), 5);
}

#[test]
fn test_three_ticks_spend_thirty() {
    let run = run(&["agent_1", "agent_2"], 3);
    assert_eq!(run.summary.final_tick, 2);
    for name in ["agent_1", "agent_2"] {
        assert_eq!(budget(&run.manager, name), 70.0);
    }
    assert_eq!(*run.executed.borrow(), 6);
}

#[test]
fn test_outcome_is_settled_on_the_agent() {
    let run = run(&["agent_1"], 2);
    let id = EntityId::new("agent_1");
    let state = run.manager.state();

    let outcome = state.get_component::<ActionOutcomeComponent>(&id).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.reward, 2.0);
    assert!(outcome.details.contains_key("event_id"));

    let budget = state.get_component::<TimeBudgetComponent>(&id).unwrap();
    assert_eq!(budget.action_counts["work"], 2);
}

#[test]
fn test_run_exhausts_budget_and_stops_early() {
    let run = run(&["agent_1"], 50);
    assert!(run.summary.stopped_early);
    assert_eq!(run.summary.ticks_run, 10);
    assert_eq!(run.summary.final_tick, 9);
    assert_eq!(budget(&run.manager, "agent_1"), 0.0);

    let last = run.snapshots.borrow().last().cloned().unwrap();
    assert_eq!(last.current_tick, 9);
    assert_eq!(last.agents.len(), 1);
}
