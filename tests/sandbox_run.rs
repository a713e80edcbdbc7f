//! Full sandbox runs: every system registered, offline language model,
//! snapshots written to disk and read back

use arla::core::config::ArlaConfig;
use arla::core::types::EntityId;
use arla::ecs::components::{MemoryComponent, QLearningComponent};
use arla::ecs::state::SimulationState;
use arla::llm::OfflineLanguageModel;
use arla::providers::Exporter;
use arla::sandbox::{
    build_simulation, sandbox_component_factory, sandbox_registry, GridEnvironment, SandboxOptions, VitalsComponent,
};
use arla::simulation::{FileStateStore, StateStore};
use arla::systems::JsonlExporter;
use std::path::PathBuf;
use std::rc::Rc;

fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("arla_{}_{}", label, uuid::Uuid::new_v4()))
}

fn config(steps: u64) -> ArlaConfig {
    let mut config = ArlaConfig::new();
    config.simulation.steps = steps;
    config.simulation.random_seed = 7;
    config.simulation.snapshot_interval = 10;
    config.simulation.simulation_id = Some("sandbox_test".into());
    config.learning.memory.reflection_interval = 10;
    config
}

#[test]
fn test_sandbox_run_learns_reflects_and_persists() {
    let out = temp_dir("run");
    let exporter: Rc<dyn Exporter> = Rc::new(JsonlExporter::create(out.join("metrics.jsonl")).unwrap());
    let options = SandboxOptions {
        agents: 3,
        grid_size: 3,
        ..SandboxOptions::default()
    };
    let mut sim = build_simulation(
        config(25),
        options,
        Box::new(OfflineLanguageModel::new()),
        None,
        vec![exporter],
        Box::new(FileStateStore::new(&out)),
    )
    .unwrap();

    let summary = sim.manager.run().unwrap();
    assert_eq!(summary.simulation_id, "sandbox_test");
    assert_eq!(summary.ticks_run, 25);
    assert_eq!(summary.final_tick, 24);

    let state = sim.manager.state();
    for n in 1..=3 {
        let id = EntityId::new(format!("agent_{}", n));
        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert!(!memory.episodic_memory.is_empty(), "{} acted", id);
        let q = state.get_component::<QLearningComponent>(&id).unwrap();
        assert!(q.last_loss.is_some(), "{} learned", id);
        assert!(q.current_epsilon < ArlaConfig::new().learning.q_learning.initial_epsilon);
    }

    let (queries, _) = sim.scaffold.usage();
    assert!(queries > 0, "reflection at ticks 10 and 20 queries the model");

    let metrics = sim.metrics.latest();
    assert!(metrics["active_agents"] >= 1.0);
    assert!(metrics.contains_key("average_valence"));
    assert!(metrics["average_health"] > 0.0 && metrics["average_health"] <= 100.0);

    let lines = std::fs::read_to_string(out.join("metrics.jsonl")).unwrap();
    assert!(lines.lines().any(|l| l.contains("\"kind\":\"metrics\"")));
    assert!(lines.lines().any(|l| l.contains("\"kind\":\"agent_state\"")));

    assert!(out.join("sandbox_test").join("manifest.json").exists());
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_snapshot_restores_sandbox_state() {
    let out = temp_dir("snapshot");
    let store = FileStateStore::new(&out);
    let mut sim = build_simulation(
        config(12),
        SandboxOptions::default(),
        Box::new(OfflineLanguageModel::new()),
        None,
        Vec::new(),
        Box::new(store.clone()),
    )
    .unwrap();
    sim.manager.run().unwrap();

    let latest = store.latest("sandbox_test").unwrap().unwrap();
    assert!(latest.ends_with("snapshot_tick_11.json"));
    let snapshot = store.load(&latest).unwrap();
    assert_eq!(snapshot.agents.len(), 4);

    let registry = sandbox_registry().unwrap();
    let factory = sandbox_component_factory(&ArlaConfig::new(), &registry);
    let mut restored = SimulationState::new(0);
    restored.set_environment(Box::new(GridEnvironment::new(1, 1)));
    restored.restore_snapshot(&snapshot, &factory).unwrap();

    let original = sim.manager.state();
    assert_eq!(restored.current_tick, 11);
    assert_eq!(restored.entity_ids(), original.entity_ids());
    for id in original.entity_ids() {
        assert_eq!(
            restored.get_component::<VitalsComponent>(&id),
            original.get_component::<VitalsComponent>(&id)
        );
        assert_eq!(
            restored.environment().unwrap().position_of(&id),
            original.environment().unwrap().position_of(&id)
        );
        let q = restored.get_component::<QLearningComponent>(&id).unwrap();
        assert!(q.utility_network.is_some(), "network rebuilt with sandbox dimensions");
    }
    std::fs::remove_dir_all(&out).ok();
}
