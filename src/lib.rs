//! ARLA - Affective Reflective Learning Agents
//!
//! An entity-component-system engine for multi-agent cognitive simulation.
//! Agents choose actions through pluggable providers; a set of systems then
//! turns every executed action into emotion, causal knowledge, reflection,
//! goals, identity and a learned utility estimate.

pub mod actions;
pub mod cognition;
pub mod core;
pub mod ecs;
pub mod llm;
pub mod providers;
pub mod sandbox;
pub mod simulation;
pub mod systems;
