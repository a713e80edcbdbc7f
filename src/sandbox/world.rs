//! Grid world, agent vitals and perception

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{PerceptionComponent, TimeBudgetComponent};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::{Environment, PerceptionProvider, Position};

/// Bounded square grid; several agents may share a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridEnvironment {
    pub width: i32,
    pub height: i32,
    positions: BTreeMap<EntityId, Position>,
}

impl GridEnvironment {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            positions: BTreeMap::new(),
        }
    }

    pub fn place(&mut self, entity_id: &EntityId, position: Position) -> Result<()> {
        if !self.is_valid_position(position) {
            return Err(ArlaError::InvalidAction(format!(
                "position {:?} is outside the {}x{} grid",
                position, self.width, self.height
            )));
        }
        self.positions.insert(entity_id.clone(), position);
        Ok(())
    }
}

impl Environment for GridEnvironment {
    fn valid_positions(&self) -> Vec<Position> {
        (0..self.width)
            .flat_map(|x| (0..self.height).map(move |y| (x, y)))
            .collect()
    }

    fn neighbors(&self, (x, y): Position) -> Vec<Position> {
        [(0, 1), (1, 0), (0, -1), (-1, 0)]
            .into_iter()
            .map(|(dx, dy)| (x + dx, y + dy))
            .filter(|p| self.is_valid_position(*p))
            .collect()
    }

    /// Chebyshev distance, so diagonal cells are adjacent
    fn distance(&self, a: Position, b: Position) -> f32 {
        (a.0 - b.0).abs().max((a.1 - b.1).abs()) as f32
    }

    fn can_move(&self, from: Position, to: Position) -> bool {
        self.is_valid_position(to) && self.distance(from, to) <= 1.0
    }

    fn is_valid_position(&self, (x, y): Position) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }

    fn position_of(&self, entity_id: &EntityId) -> Option<Position> {
        self.positions.get(entity_id).copied()
    }

    fn entities_at(&self, position: Position) -> Vec<EntityId> {
        self.positions
            .iter()
            .filter(|(_, p)| **p == position)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn entities_in_radius(&self, center: Position, radius: i32) -> Vec<(EntityId, Position)> {
        self.positions
            .iter()
            .filter(|(_, p)| self.distance(center, **p) <= radius as f32)
            .map(|(id, p)| (id.clone(), *p))
            .collect()
    }

    fn update_entity_position(&mut self, entity_id: &EntityId, new_position: Position) {
        if self.is_valid_position(new_position) {
            self.positions.insert(entity_id.clone(), new_position);
        }
    }

    fn remove_entity(&mut self, entity_id: &EntityId) {
        self.positions.remove(entity_id);
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, data: &serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(data.clone())?;
        Ok(())
    }
}

/// Physical condition of a sandbox agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsComponent {
    pub health: f32,
    pub max_health: f32,
    pub resources: f32,
    pub max_resources: f32,
}

impl VitalsComponent {
    pub fn new(max_health: f32, resources: f32) -> Self {
        Self {
            health: max_health,
            max_health,
            resources,
            max_resources: 20.0,
        }
    }

    pub fn health_norm(&self) -> f32 {
        if self.max_health <= 0.0 {
            0.0
        } else {
            (self.health / self.max_health).clamp(0.0, 1.0)
        }
    }

    pub fn resources_norm(&self) -> f32 {
        if self.max_resources <= 0.0 {
            0.0
        } else {
            (self.resources / self.max_resources).clamp(0.0, 1.0)
        }
    }

    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount).clamp(0.0, self.max_health);
    }

    pub fn harm(&mut self, amount: f32) {
        self.health = (self.health - amount).max(0.0);
    }

    pub fn gain(&mut self, amount: f32) {
        self.resources = (self.resources + amount).clamp(0.0, self.max_resources);
    }
}

impl ComponentKind for VitalsComponent {
    const NAME: &'static str = "VitalsComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=self.max_health).contains(&self.health) {
            errors.push(format!("health {} outside [0, {}]", self.health, self.max_health));
        }
        if !(0.0..=self.max_resources).contains(&self.resources) {
            errors.push(format!("resources {} outside [0, {}]", self.resources, self.max_resources));
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let health = if self.health.is_nan() { 0.0 } else { self.health.clamp(0.0, self.max_health) };
        let resources = if self.resources.is_nan() { 0.0 } else { self.resources.clamp(0.0, self.max_resources) };
        let fixed = health != self.health || resources != self.resources;
        self.health = health;
        self.resources = resources;
        fixed
    }
}

/// Refreshes `PerceptionComponent::visible_entities` from the grid
#[derive(Debug, Default)]
pub struct GridPerception;

impl PerceptionProvider for GridPerception {
    fn update_perception(&self, state: &mut SimulationState, _tick: Tick) {
        let observers = state.entities_with_components(&[PerceptionComponent::NAME]);
        for observer in observers {
            let visible: BTreeMap<EntityId, serde_json::Value> = {
                let Some(env) = state.environment() else {
                    return;
                };
                let (Some(center), Some(perception)) = (
                    env.position_of(&observer),
                    state.get_component::<PerceptionComponent>(&observer),
                ) else {
                    continue;
                };
                env.entities_in_radius(center, perception.vision_range)
                    .into_iter()
                    .filter(|(id, _)| *id != observer)
                    .map(|(id, p)| {
                        let distance = env.distance(center, p);
                        (id, serde_json::json!({ "position": [p.0, p.1], "distance": distance }))
                    })
                    .collect()
            };
            if let Some(perception) = state.get_component_mut::<PerceptionComponent>(&observer) {
                perception.visible_entities = visible;
            }
        }
    }
}

/// World upkeep after every tick: agents eat, starve or recover, then
/// perception is refreshed for the next round of decisions
pub struct WorldSystem {
    perception: Box<dyn PerceptionProvider>,
    upkeep: f32,
}

impl WorldSystem {
    pub fn new(perception: Box<dyn PerceptionProvider>) -> Rc<Self> {
        Rc::new(Self { perception, upkeep: 0.5 })
    }
}

impl System for WorldSystem {
    fn name(&self) -> &str {
        "WorldSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        &[VitalsComponent::NAME, TimeBudgetComponent::NAME]
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        for entity_id in state.entities_with_components(self.required_components()) {
            let vitals = state.require_mut::<VitalsComponent>(&entity_id)?;
            if vitals.resources >= self.upkeep {
                vitals.resources -= self.upkeep;
            } else {
                vitals.harm(5.0);
            }
            if vitals.health <= 0.0 {
                let budget = state.require_mut::<TimeBudgetComponent>(&entity_id)?;
                if budget.is_active {
                    budget.is_active = false;
                    tracing::info!("{} collapsed at tick {}", entity_id, tick);
                }
            }
        }
        self.perception.update_perception(state, tick);
        Ok(())
    }
}
