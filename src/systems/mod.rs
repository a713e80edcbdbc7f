//! Cognitive and bookkeeping systems
//!
//! Each system is created against a `SimulationState`, subscribes its event
//! handlers on the state's bus, and is registered with the `SystemManager`
//! for its per-tick `update`.

pub mod action;
pub mod affect;
pub mod causal_graph;
pub mod goal;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod q_learning;
pub mod reflection;

pub use action::ActionSystem;
pub use affect::AffectSystem;
pub use causal_graph::CausalGraphSystem;
pub use goal::GoalSystem;
pub use identity::IdentitySystem;
pub use logging::LoggingSystem;
pub use metrics::{JsonlExporter, MetricsSystem, TracingExporter};
pub use q_learning::QLearningSystem;
pub use reflection::ReflectionSystem;
