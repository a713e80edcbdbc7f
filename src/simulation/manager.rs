//! Engine loop
//!
//! Each tick: collect agents with an active time budget, shuffle them with
//! the state RNG, let each one choose an action, then run every system.
//! A run ends when the step limit is reached or nobody is active.

use rand::seq::SliceRandom;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::config::ArlaConfig;
use crate::core::error::Result;
use crate::core::types::{EntityId, SimulationId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{ActionPlanComponent, TimeBudgetComponent};
use crate::ecs::events::Event;
use crate::ecs::state::SimulationState;
use crate::ecs::system::SystemManager;
use crate::providers::{ActionGenerator, DecisionSelector};
use crate::simulation::snapshot::{RunManifest, StateStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub simulation_id: String,
    /// Last tick that completed
    pub final_tick: Tick,
    pub ticks_run: u64,
    /// True when the run ended because no agent was active
    pub stopped_early: bool,
}

pub struct SimulationManager {
    config: ArlaConfig,
    state: SimulationState,
    systems: SystemManager,
    action_generator: Box<dyn ActionGenerator>,
    decision_selector: Box<dyn DecisionSelector>,
    state_store: Box<dyn StateStore>,
}

impl std::fmt::Debug for SimulationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationManager")
            .field("state", &self.state)
            .field("systems", &self.systems)
            .finish()
    }
}

impl SimulationManager {
    pub fn new(
        config: ArlaConfig,
        mut state: SimulationState,
        systems: SystemManager,
        action_generator: Box<dyn ActionGenerator>,
        decision_selector: Box<dyn DecisionSelector>,
        state_store: Box<dyn StateStore>,
    ) -> Self {
        if let Some(id) = &config.simulation.simulation_id {
            state.simulation_id = SimulationId(id.clone());
        }
        Self {
            config,
            state,
            systems,
            action_generator,
            decision_selector,
            state_store,
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn into_state(self) -> SimulationState {
        self.state
    }

    /// Run up to `simulation.steps` ticks. A system error aborts the run and
    /// is returned; no final snapshot is written in that case.
    pub fn run(&mut self) -> Result<RunSummary> {
        let steps = self.config.simulation.steps;
        let snapshot_interval = self.config.simulation.snapshot_interval.max(1);
        let started_at_ms = unix_millis();
        let simulation_id = self.state.simulation_id.to_string();

        tracing::info!(
            "Starting simulation {} for {} steps with {} entities",
            simulation_id,
            steps,
            self.state.entity_count()
        );

        let mut ticks_run = 0u64;
        let mut final_tick = 0;
        let mut stopped_early = false;

        for tick in 0..steps {
            self.state.current_tick = tick;

            let mut active = active_entities(&self.state);
            if active.is_empty() {
                tracing::info!("No active entities at tick {}; stopping", tick);
                stopped_early = true;
                break;
            }
            active.shuffle(self.state.rng());

            for entity_id in &active {
                self.take_turn(entity_id, tick);
            }

            self.systems.update_all(&mut self.state, tick)?;

            ticks_run += 1;
            final_tick = tick;

            if tick > 0 && tick % snapshot_interval == 0 {
                self.save_snapshot();
            }
        }

        self.state.current_tick = final_tick;
        self.save_snapshot();

        let summary = RunSummary {
            simulation_id,
            final_tick,
            ticks_run,
            stopped_early,
        };
        let manifest = RunManifest {
            simulation_id: summary.simulation_id.clone(),
            random_seed: self.config.simulation.random_seed,
            steps,
            started_at_ms,
            ended_at_ms: unix_millis(),
            final_tick,
            ticks_run,
            entity_count: self.state.entity_count(),
            stopped_early,
        };
        match self.state_store.save_manifest(&manifest) {
            Ok(Some(path)) => tracing::debug!("Wrote run manifest to {}", path.display()),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to write run manifest: {}", e),
        }

        tracing::info!(
            "Simulation {} finished after {} ticks (final tick {})",
            summary.simulation_id,
            ticks_run,
            final_tick
        );
        Ok(summary)
    }

    /// Decision pipeline for one entity: generate, select, attach, announce
    fn take_turn(&mut self, entity_id: &EntityId, tick: Tick) {
        // An earlier turn this tick may have exhausted this entity
        let still_active = self
            .state
            .get_component::<TimeBudgetComponent>(entity_id)
            .map_or(false, |b| b.is_active);
        if !still_active {
            return;
        }

        let candidates = self.action_generator.generate(&self.state, entity_id, tick);
        let Some(plan) = self.decision_selector.select(&mut self.state, entity_id, &candidates) else {
            tracing::debug!("{} chose no action at tick {}", entity_id, tick);
            return;
        };

        if let Err(e) = self
            .state
            .add_component(entity_id, ActionPlanComponent::new(plan.clone()))
        {
            tracing::warn!("Could not attach plan to {}: {}", entity_id, e);
            return;
        }

        self.state.publish(Event::ActionChosen {
            entity_id: entity_id.clone(),
            plan,
            tick,
        });
    }

    fn save_snapshot(&self) {
        let snapshot = self.state.to_snapshot();
        if let Err(e) = self.state_store.save(&snapshot) {
            tracing::error!("Failed to save snapshot at tick {}: {}", snapshot.current_tick, e);
        }
    }
}

/// Entities whose time budget is still active, in id order
pub fn active_entities(state: &SimulationState) -> Vec<EntityId> {
    state
        .entities_with_components(&[TimeBudgetComponent::NAME])
        .into_iter()
        .filter(|id| {
            state
                .get_component::<TimeBudgetComponent>(id)
                .map_or(false, |b| b.is_active)
        })
        .collect()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
