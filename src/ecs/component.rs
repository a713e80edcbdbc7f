//! Component traits
//!
//! Components are plain data. Each concrete type carries a stable string tag
//! (`ComponentKind::NAME`) that keys it inside an entity and names it inside
//! snapshots. `Component` is the object-safe view the state stores; it is
//! implemented for every `ComponentKind` automatically.

use serde::Serialize;
use std::any::Any;
use std::fmt;

use crate::core::types::EntityId;

/// Typed side of a component: its tag plus validation rules
pub trait ComponentKind: Serialize + fmt::Debug + 'static {
    const NAME: &'static str;

    /// Invariant violations, empty when the component is healthy
    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        Vec::new()
    }

    /// Repair what can be repaired; returns true when anything changed
    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        false
    }
}

/// Object-safe component interface stored by `SimulationState`
pub trait Component: fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn to_value(&self) -> serde_json::Value;
    fn validate(&self, entity_id: &EntityId) -> Vec<String>;
    fn auto_fix(&mut self, entity_id: &EntityId) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ComponentKind> Component for T {
    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn to_value(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to serialize {}: {}", T::NAME, e);
                serde_json::Value::Null
            }
        }
    }

    fn validate(&self, entity_id: &EntityId) -> Vec<String> {
        ComponentKind::validate(self, entity_id)
    }

    fn auto_fix(&mut self, entity_id: &EntityId) -> bool {
        ComponentKind::auto_fix(self, entity_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn Component {
    pub fn downcast_ref<T: ComponentKind>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ComponentKind>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
