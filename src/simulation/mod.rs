//! Running a simulation: the engine loop and snapshot persistence

pub mod manager;
pub mod snapshot;

pub use manager::{active_entities, RunSummary, SimulationManager};
pub use snapshot::{AgentSnapshot, ComponentSnapshot, FileStateStore, RunManifest, SimulationSnapshot, StateStore};
