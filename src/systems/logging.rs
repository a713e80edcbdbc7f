//! Forwards agent state, executed actions and learning curves to exporters

use serde_json::{Map, Value};
use std::rc::Rc;

use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::TimeBudgetComponent;
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::Exporter;

pub struct LoggingSystem {
    exporters: Vec<Rc<dyn Exporter>>,
    /// Component tags written per agent each tick; empty logs all of them
    logged_components: Vec<String>,
}

impl LoggingSystem {
    const REQUIRED: &'static [&'static str] = &[TimeBudgetComponent::NAME];

    pub fn new(state: &SimulationState, exporters: Vec<Rc<dyn Exporter>>, logged_components: Vec<String>) -> Rc<Self> {
        let system = Rc::new(Self {
            exporters,
            logged_components,
        });
        let bus = state.event_bus();

        let this = Rc::clone(&system);
        bus.subscribe(topics::ACTION_EXECUTED, move |_, event| {
            let tick = event.tick().unwrap_or_default();
            let payload = event.to_value();
            this.each_exporter("log_event", |exporter| {
                exporter.log_event(tick, topics::ACTION_EXECUTED, &payload)
            });
            Ok(())
        });
        let this = Rc::clone(&system);
        bus.subscribe(topics::Q_LEARNING_UPDATE, move |_, event| {
            if let Event::QLearningUpdate { entity_id, loss, tick } = event {
                this.each_exporter("log_learning_curve", |exporter| {
                    exporter.log_learning_curve(entity_id, *tick, *loss)
                });
            }
            Ok(())
        });
        system
    }

    fn each_exporter<F>(&self, what: &str, mut call: F)
    where
        F: FnMut(&dyn Exporter) -> Result<()>,
    {
        for exporter in &self.exporters {
            if let Err(e) = call(exporter.as_ref()) {
                tracing::warn!("Exporter failed in {}: {}", what, e);
            }
        }
    }

    fn agent_state(&self, state: &SimulationState, entity_id: &EntityId) -> Value {
        let mut components = Map::new();
        for component in state.components_of(entity_id) {
            let name = component.type_name();
            if self.logged_components.is_empty() || self.logged_components.iter().any(|c| c == name) {
                components.insert(name.to_string(), component.to_value());
            }
        }
        Value::Object(components)
    }
}

impl System for LoggingSystem {
    fn name(&self) -> &str {
        "LoggingSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        Self::REQUIRED
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        if self.exporters.is_empty() {
            return Ok(());
        }
        for entity_id in state.entities_with_components(Self::REQUIRED) {
            let snapshot = self.agent_state(state, &entity_id);
            self.each_exporter("log_agent_state", |exporter| {
                exporter.log_agent_state(&entity_id, tick, &snapshot)
            });
        }
        Ok(())
    }
}
