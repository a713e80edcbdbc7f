//! Populating the sandbox, choosing actions, and wiring a complete run

use rand::seq::SliceRandom;
use rand::Rng;
use std::rc::Rc;

use crate::actions::{ActionPlan, ActionRegistry};
use crate::cognition::identity::MultiDomainIdentity;
use crate::cognition::utility::UtilityNetwork;
use crate::core::config::ArlaConfig;
use crate::core::error::Result;
use crate::core::types::{EntityId, SimulationId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{
    EmotionComponent, GoalComponent, PerceptionComponent, QLearningComponent, TimeBudgetComponent,
};
use crate::ecs::state::SimulationState;
use crate::ecs::system::SystemManager;
use crate::llm::{CognitiveScaffold, InteractionLog, LanguageModel};
use crate::providers::{
    cognitive_components, internal_state_dim, ActionGenerator, DecisionSelector, DefaultComponentFactory, Exporter,
    Metrics, MetricsCalculator, PerceptionProvider, ScenarioLoader, StateEncoder,
};
use crate::sandbox::actions::{intent_of, sandbox_registry, ActionExecutor};
use crate::sandbox::providers::{
    SandboxControllability, SandboxNarrative, SandboxNodeEncoder, SandboxRewardCalculator, SandboxStateEncoder,
    SandboxVitality,
};
use crate::sandbox::world::{GridEnvironment, GridPerception, VitalsComponent, WorldSystem};
use crate::simulation::manager::SimulationManager;
use crate::simulation::snapshot::StateStore;
use crate::systems::{
    ActionSystem, AffectSystem, CausalGraphSystem, GoalSystem, IdentitySystem, LoggingSystem, MetricsSystem,
    QLearningSystem, ReflectionSystem,
};

/// Knobs of the sandbox world itself; the cognitive side comes from `ArlaConfig`
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub agents: usize,
    pub grid_size: i32,
    pub initial_time_budget: f32,
    pub max_health: f32,
    pub starting_resources: f32,
    pub vision_range: i32,
    /// Components the logging system writes per agent and tick
    pub logged_components: Vec<String>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            agents: 4,
            grid_size: 6,
            initial_time_budget: 200.0,
            max_health: 100.0,
            starting_resources: 5.0,
            vision_range: 3,
            logged_components: vec![
                TimeBudgetComponent::NAME.to_string(),
                VitalsComponent::NAME.to_string(),
                EmotionComponent::NAME.to_string(),
                GoalComponent::NAME.to_string(),
            ],
        }
    }
}

/// `(state_dim, internal_dim, action_dim)` of every sandbox utility network
pub fn q_dims(config: &ArlaConfig, registry: &ActionRegistry) -> (usize, usize, usize) {
    (SandboxStateEncoder::DIM, internal_state_dim(config), registry.action_feature_dim())
}

/// Core components plus the sandbox's own, for restoring snapshots
pub fn sandbox_component_factory(config: &ArlaConfig, registry: &ActionRegistry) -> DefaultComponentFactory {
    let mut factory = DefaultComponentFactory::with_core_components(config, q_dims(config, registry));
    factory.register::<VitalsComponent>();
    factory
}

/// Scatters `agent_1..agent_n` over a square grid
pub struct SandboxScenario {
    config: Rc<ArlaConfig>,
    options: SandboxOptions,
    dims: (usize, usize, usize),
}

impl SandboxScenario {
    pub fn new(config: Rc<ArlaConfig>, options: SandboxOptions, registry: &ActionRegistry) -> Self {
        let dims = q_dims(&config, registry);
        Self { config, options, dims }
    }
}

impl ScenarioLoader for SandboxScenario {
    fn load(&self, state: &mut SimulationState) -> Result<()> {
        let size = self.options.grid_size.max(1);
        let mut grid = GridEnvironment::new(size, size);
        let (state_dim, internal_dim, action_dim) = self.dims;
        let identity_dim = self.config.agent.cognitive.embeddings.identity_dim;
        let alpha = self.config.learning.q_learning.alpha;
        let seed = self.config.simulation.random_seed;

        for n in 1..=self.options.agents {
            let id = EntityId::new(format!("agent_{}", n));
            state.add_entity(id.clone())?;
            let position = (state.rng().gen_range(0..size), state.rng().gen_range(0..size));
            grid.place(&id, position)?;

            state.add_component(&id, TimeBudgetComponent::new(self.options.initial_time_budget))?;
            state.add_component(
                &id,
                VitalsComponent::new(self.options.max_health, self.options.starting_resources),
            )?;
            state.add_component(&id, PerceptionComponent::new(self.options.vision_range))?;

            let identity = MultiDomainIdentity::new(identity_dim, state.rng());
            let network = UtilityNetwork::new(state_dim, internal_dim, action_dim, alpha, seed.wrapping_add(n as u64));
            for component in cognitive_components(&self.config, identity, network) {
                state.add_boxed_component(&id, component)?;
            }
        }
        state.set_environment(Box::new(grid));
        tracing::info!("Sandbox loaded {} agents on a {}x{} grid", self.options.agents, size, size);
        Ok(())
    }
}

/// Every parameter variant of every registered action
pub struct SandboxActionGenerator {
    registry: Rc<ActionRegistry>,
}

impl SandboxActionGenerator {
    pub fn new(registry: Rc<ActionRegistry>) -> Self {
        Self { registry }
    }
}

impl ActionGenerator for SandboxActionGenerator {
    fn generate(&self, state: &SimulationState, entity_id: &EntityId, tick: Tick) -> Vec<ActionPlan> {
        self.registry
            .iter()
            .flat_map(|action| {
                let id = action.action_id();
                action
                    .generate_possible_params(entity_id, state, tick)
                    .into_iter()
                    .map(move |params| ActionPlan::new(id).with_intent(intent_of(id)).with_params(params))
            })
            .collect()
    }
}

/// Explores with the agent's current epsilon, otherwise takes the plan its
/// utility network rates highest. All randomness comes from the state RNG.
pub struct EpsilonGreedySelector {
    config: Rc<ArlaConfig>,
    registry: Rc<ActionRegistry>,
    encoder: Box<dyn StateEncoder>,
}

impl EpsilonGreedySelector {
    pub fn new(config: Rc<ArlaConfig>, registry: Rc<ActionRegistry>, encoder: Box<dyn StateEncoder>) -> Self {
        Self {
            config,
            registry,
            encoder,
        }
    }

    fn best(&self, state: &SimulationState, entity_id: &EntityId, candidates: &[ActionPlan]) -> Option<ActionPlan> {
        let network = state
            .get_component::<QLearningComponent>(entity_id)?
            .utility_network
            .as_ref()?;
        let internal = self.encoder.encode_internal_state(state, entity_id, &self.config);

        let mut best: Option<(f32, &ActionPlan)> = None;
        for plan in candidates {
            let target = plan.param_str("target_agent_id").map(EntityId::new);
            let encoded = self.encoder.encode_state(state, entity_id, target.as_ref());
            let features = self.registry.encode_plan(entity_id, state, plan);
            let q = network.predict(&encoded, &internal, &features);
            if best.map_or(true, |(b, _)| q > b) {
                best = Some((q, plan));
            }
        }
        best.map(|(_, plan)| plan.clone())
    }
}

impl DecisionSelector for EpsilonGreedySelector {
    fn select(&self, state: &mut SimulationState, entity_id: &EntityId, candidates: &[ActionPlan]) -> Option<ActionPlan> {
        if candidates.is_empty() {
            return None;
        }
        let epsilon = state
            .get_component::<QLearningComponent>(entity_id)
            .filter(|q| q.utility_network.is_some())
            .map(|q| q.current_epsilon);
        let explore = match epsilon {
            Some(epsilon) => state.rng().gen::<f32>() < epsilon,
            None => true,
        };
        if explore {
            return candidates.choose(state.rng()).cloned();
        }
        self.best(state, entity_id, candidates)
    }
}

/// Mean health and total stores of the sandbox population
pub struct VitalsCalculator;

impl MetricsCalculator for VitalsCalculator {
    fn name(&self) -> &str {
        "vitals"
    }

    fn calculate(&self, state: &SimulationState) -> Result<Metrics> {
        let vitals: Vec<&VitalsComponent> = state
            .entities_with_components(&[VitalsComponent::NAME])
            .iter()
            .filter_map(|id| state.get_component::<VitalsComponent>(id))
            .collect();
        let mean_health = if vitals.is_empty() {
            0.0
        } else {
            vitals.iter().map(|v| v.health as f64).sum::<f64>() / vitals.len() as f64
        };
        Ok(Metrics::from([
            ("average_health".to_string(), mean_health),
            ("total_resources".to_string(), vitals.iter().map(|v| v.resources as f64).sum::<f64>()),
        ]))
    }
}

/// A wired sandbox run, with handles on what the report needs
pub struct SandboxSimulation {
    pub manager: SimulationManager,
    pub scaffold: Rc<CognitiveScaffold>,
    pub metrics: Rc<MetricsSystem>,
}

/// Load the sandbox and register every system, in update order
pub fn build_simulation(
    config: ArlaConfig,
    options: SandboxOptions,
    model: Box<dyn LanguageModel>,
    interaction_log: Option<InteractionLog>,
    exporters: Vec<Rc<dyn Exporter>>,
    state_store: Box<dyn StateStore>,
) -> Result<SandboxSimulation> {
    config.validate()?;
    let config = Rc::new(config);
    let registry = Rc::new(sandbox_registry()?);

    let mut state = SimulationState::new(config.simulation.random_seed);
    if let Some(id) = &config.simulation.simulation_id {
        state.simulation_id = SimulationId(id.clone());
    }
    SandboxScenario::new(Rc::clone(&config), options.clone(), &registry).load(&mut state)?;

    let mut scaffold = CognitiveScaffold::new(
        state.simulation_id.to_string(),
        model,
        config.agent.cognitive.embeddings.main_embedding_dim,
    )
    .with_settings(&config.llm);
    if let Some(log) = interaction_log {
        scaffold = scaffold.with_log(log);
    }
    let scaffold = Rc::new(scaffold);

    ActionExecutor::install(&state, Rc::clone(&registry));
    let action = ActionSystem::new(&state, Rc::clone(&registry), Box::new(SandboxRewardCalculator));
    let world = WorldSystem::new(Box::new(GridPerception));
    let causal = CausalGraphSystem::new(&state, &config, Box::new(SandboxNodeEncoder));
    let q_learning = QLearningSystem::new(
        &state,
        Rc::clone(&config),
        Rc::clone(&registry),
        Box::new(SandboxStateEncoder),
        Some(Rc::clone(&causal)),
    );
    let affect = AffectSystem::new(
        &state,
        &config,
        Rc::clone(&registry),
        Rc::clone(&scaffold),
        Box::new(SandboxVitality),
        Box::new(SandboxControllability),
    );
    let reflection = ReflectionSystem::new(
        &state,
        &config,
        Rc::clone(&scaffold),
        Rc::clone(&registry),
        Box::new(SandboxNarrative),
    );
    let goal = GoalSystem::new(&state, &config, Rc::clone(&scaffold));
    let identity = IdentitySystem::new(&state, Rc::clone(&scaffold));
    let logging = LoggingSystem::new(&state, exporters.clone(), options.logged_components.clone());
    let mut calculators = MetricsSystem::default_calculators();
    calculators.push(Box::new(VitalsCalculator));
    let metrics = MetricsSystem::new(calculators, exporters);

    let mut systems = SystemManager::new();
    systems.register(action);
    systems.register(world);
    systems.register(q_learning);
    systems.register(affect);
    systems.register(causal);
    systems.register(reflection);
    systems.register(goal);
    systems.register(identity);
    systems.register(logging);
    systems.register(metrics.clone());

    // Perception is fresh before the first round of decisions
    GridPerception.update_perception(&mut state, 0);

    let manager = SimulationManager::new(
        (*config).clone(),
        state,
        systems,
        Box::new(SandboxActionGenerator::new(Rc::clone(&registry))),
        Box::new(EpsilonGreedySelector::new(
            Rc::clone(&config),
            registry,
            Box::new(SandboxStateEncoder),
        )),
        state_store,
    );
    Ok(SandboxSimulation {
        manager,
        scaffold,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::IdentityComponent;
    use crate::sandbox::actions::{FORAGE, SHARE};

    fn loaded(agents: usize) -> (SimulationState, Rc<ActionRegistry>, Rc<ArlaConfig>) {
        let config = Rc::new(ArlaConfig::new());
        let registry = Rc::new(sandbox_registry().unwrap());
        let options = SandboxOptions {
            agents,
            grid_size: 2,
            ..SandboxOptions::default()
        };
        let mut state = SimulationState::new(5);
        SandboxScenario::new(Rc::clone(&config), options, &registry)
            .load(&mut state)
            .unwrap();
        GridPerception.update_perception(&mut state, 0);
        (state, registry, config)
    }

    #[test]
    fn test_scenario_populates_agents() {
        let (state, _, _) = loaded(3);
        assert_eq!(state.entity_count(), 3);
        let id = EntityId::new("agent_2");
        assert!(state.has_component::<VitalsComponent>(&id));
        assert!(state.has_component::<IdentityComponent>(&id));
        assert!(state.has_component::<QLearningComponent>(&id));
        let position = state.environment().and_then(|env| env.position_of(&id)).unwrap();
        assert!(state.environment().unwrap().is_valid_position(position));
    }

    #[test]
    fn test_generator_tags_intents() {
        let (state, registry, _) = loaded(2);
        let plans = SandboxActionGenerator::new(registry).generate(&state, &EntityId::new("agent_1"), 0);
        // forage, rest, then one share and one spar per neighbour on a 2x2 grid
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[0].action_id, FORAGE);
        let share = plans.iter().find(|p| p.action_id == SHARE).unwrap();
        assert_eq!(share.intent, crate::actions::Intent::Cooperate);
        assert_eq!(share.param_str("target_agent_id"), Some("agent_2"));
    }

    #[test]
    fn test_greedy_selection_is_deterministic() {
        let (mut state, registry, config) = loaded(2);
        let id = EntityId::new("agent_1");
        state.get_component_mut::<QLearningComponent>(&id).unwrap().current_epsilon = 0.0;
        let plans = SandboxActionGenerator::new(Rc::clone(&registry)).generate(&state, &id, 0);
        let selector = EpsilonGreedySelector::new(config, registry, Box::new(SandboxStateEncoder));

        let first = selector.select(&mut state, &id, &plans).unwrap();
        let second = selector.select(&mut state, &id, &plans).unwrap();
        assert_eq!(first, second);
        assert!(selector.select(&mut state, &id, &[]).is_none());
    }

    #[test]
    fn test_factory_knows_vitals() {
        let registry = sandbox_registry().unwrap();
        let factory = sandbox_component_factory(&ArlaConfig::new(), &registry);
        assert!(factory.knows(VitalsComponent::NAME));
        assert!(factory.knows(QLearningComponent::NAME));
    }
}
