//! A small reference world: agents on a grid who forage, rest, share and spar
//!
//! Everything here is an implementation of the collaborator traits in
//! `providers`; the engine and the cognitive systems know nothing about it.

pub mod actions;
pub mod providers;
pub mod scenario;
pub mod world;

pub use actions::{sandbox_registry, ActionExecutor};
pub use scenario::{
    build_simulation, sandbox_component_factory, EpsilonGreedySelector, SandboxActionGenerator, SandboxOptions,
    SandboxScenario, SandboxSimulation,
};
pub use world::{GridEnvironment, GridPerception, VitalsComponent, WorldSystem};
