//! Entity-component-system core

pub mod component;
pub mod components;
pub mod event_bus;
pub mod events;
pub mod state;
pub mod system;

pub use component::{Component, ComponentKind};
pub use event_bus::EventBus;
pub use events::{topics, Event, ReflectionContext};
pub use state::SimulationState;
pub use system::{System, SystemManager};
