//! Goal invention and selection after each reflection

use rand::seq::SliceRandom;
use std::rc::Rc;

use crate::cognition::clustering::KMeans;
use crate::core::config::ArlaConfig;
use crate::core::error::Result;
use crate::core::math::{cosine_similarity, mean};
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::{
    EmotionComponent, GoalComponent, IdentityComponent, MemoryComponent, SymbolicGoal,
};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::llm::prompts::{self, purpose};
use crate::llm::scaffold::CognitiveScaffold;

/// Goals every agent starts from, with the text their embedding is built on
const DEFAULT_GOALS: [(&str, &str); 2] = [
    ("gather resources", "collecting materials"),
    ("survive", "prioritizing safety"),
];

/// Minimum final reward for a memory to count as a success
const SUCCESS_THRESHOLD: f32 = 0.1;
const SAMPLES_PER_CLUSTER: usize = 3;

const CONTEXT_WEIGHT: f32 = 2.0;
const HISTORY_WEIGHT: f32 = 1.5;
const IDENTITY_WEIGHT: f32 = 1.0;

pub struct GoalSystem {
    scaffold: Rc<CognitiveScaffold>,
    min_successes: usize,
}

impl GoalSystem {
    pub fn new(state: &SimulationState, config: &ArlaConfig, scaffold: Rc<CognitiveScaffold>) -> Rc<Self> {
        let system = Rc::new(Self {
            scaffold,
            min_successes: config.learning.memory.goal_invention_min_successes,
        });
        let this = Rc::clone(&system);
        state.event_bus().subscribe(topics::UPDATE_GOALS, move |state, event| match event {
            Event::UpdateGoals {
                entity_id,
                narrative,
                tick,
            } => this.on_update_goals(state, entity_id, narrative, *tick),
            _ => Ok(()),
        });
        system
    }

    fn on_update_goals(&self, state: &mut SimulationState, entity_id: &EntityId, narrative: &str, tick: Tick) -> Result<()> {
        if !state.has_component::<GoalComponent>(entity_id) {
            return Ok(());
        }

        self.seed_default_goals(state, entity_id, tick)?;
        self.invent_goals(state, entity_id, tick)?;

        let chosen = self.select_goal(state, entity_id, narrative);
        let goals = state.require_mut::<GoalComponent>(entity_id)?;
        if chosen.is_some() && chosen != goals.current_symbolic_goal {
            tracing::info!(
                "{} switched goal from {:?} to {:?} at tick {}",
                entity_id,
                goals.current_symbolic_goal,
                chosen,
                tick
            );
        }
        if chosen.is_some() {
            goals.current_symbolic_goal = chosen;
        }
        Ok(())
    }

    fn seed_default_goals(&self, state: &mut SimulationState, entity_id: &EntityId, tick: Tick) -> Result<()> {
        if !state.require_mut::<GoalComponent>(entity_id)?.symbolic_goals.is_empty() {
            return Ok(());
        }
        let mut seeded = Vec::new();
        for (name, description) in DEFAULT_GOALS {
            match self.scaffold.embed(&format!("{}: {}", name, description)) {
                Ok(embedding) => seeded.push(SymbolicGoal {
                    name: name.to_string(),
                    embedding,
                    success_history: vec![0.5],
                    last_updated_tick: tick,
                }),
                Err(e) => tracing::warn!("Default goal '{}' skipped for {}: {}", name, entity_id, e),
            }
        }
        state.require_mut::<GoalComponent>(entity_id)?.symbolic_goals.extend(seeded);
        Ok(())
    }

    /// Cluster every remembered success and name one goal per cluster
    fn invent_goals(&self, state: &mut SimulationState, entity_id: &EntityId, tick: Tick) -> Result<()> {
        let Some(memory) = state.get_component::<MemoryComponent>(entity_id) else {
            return Ok(());
        };
        let summaries: Vec<String> = memory
            .episodic_memory
            .iter()
            .filter(|m| m.outcome > SUCCESS_THRESHOLD)
            .map(|m| m.summary())
            .collect();
        if summaries.len() < self.min_successes.max(1) {
            return Ok(());
        }

        let mut embedded: Vec<(String, Vec<f32>)> = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.scaffold.embed(&summary) {
                Ok(embedding) => embedded.push((summary, embedding)),
                Err(e) => tracing::warn!("Skipping memory embedding for {}: {}", entity_id, e),
            }
        }
        if embedded.len() < 3 {
            return Ok(());
        }

        let k = (embedded.len() / 5).clamp(1, 3);
        let vectors: Vec<Vec<f32>> = embedded.iter().map(|(_, e)| e.clone()).collect();
        let clusters = match KMeans::new(k, tick).fit(&vectors) {
            Ok(clusters) => clusters,
            Err(e) => {
                tracing::warn!("Goal invention clustering failed for {}: {}", entity_id, e);
                return Ok(());
            }
        };

        for cluster in 0..k {
            let mut members = clusters.members(cluster);
            if members.is_empty() {
                continue;
            }
            let support = members.len();
            members.shuffle(state.rng());
            let sample: Vec<String> = members
                .iter()
                .take(SAMPLES_PER_CLUSTER)
                .map(|&i| embedded[i].0.clone())
                .collect();

            let reply = match self
                .scaffold
                .query(entity_id, purpose::GOAL_INVENTION, &prompts::goal_invention(&sample), tick)
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("Goal invention query failed for {}: {}", entity_id, e);
                    continue;
                }
            };
            let Some(name) = prompts::clean_goal_name(&reply) else {
                tracing::debug!("Rejected goal name '{}' for {}", reply.trim(), entity_id);
                continue;
            };
            self.add_goal(state, entity_id, name, support, tick)?;
        }
        Ok(())
    }

    fn add_goal(&self, state: &mut SimulationState, entity_id: &EntityId, name: String, support: usize, tick: Tick) -> Result<()> {
        let goals = state.require_mut::<GoalComponent>(entity_id)?;
        if let Some(existing) = goals.goal_mut(&name) {
            existing.success_history.extend(std::iter::repeat(1.0).take(support));
            existing.last_updated_tick = tick;
            return Ok(());
        }

        let embedding = match self.scaffold.embed(&name) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Invented goal '{}' dropped for {}: {}", name, entity_id, e);
                return Ok(());
            }
        };
        tracing::info!("{} invented goal '{}' from {} successes", entity_id, name, support);
        state.require_mut::<GoalComponent>(entity_id)?.symbolic_goals.push(SymbolicGoal {
            name,
            embedding,
            success_history: vec![1.0; support],
            last_updated_tick: tick,
        });
        Ok(())
    }

    /// Best-scoring goal for the current narrative, or the current goal when
    /// the context cannot be embedded
    fn select_goal(&self, state: &SimulationState, entity_id: &EntityId, narrative: &str) -> Option<String> {
        let goals = state.get_component::<GoalComponent>(entity_id)?;

        let identity = state.get_component::<IdentityComponent>(entity_id);
        let mut traits: Vec<(&String, &f32)> = identity
            .map(|i| i.salient_traits_cache.iter().collect())
            .unwrap_or_default();
        traits.sort_by(|a, b| b.1.total_cmp(a.1));
        let trait_names: Vec<String> = traits.into_iter().map(|(name, _)| name.clone()).collect();
        let emotion = state
            .get_component::<EmotionComponent>(entity_id)
            .map_or("unknown", |e| e.current_emotion_category.as_str());

        let context = prompts::goal_selection_context(narrative, &trait_names, emotion);
        let context_embedding = match self.scaffold.embed(&context) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Goal context embedding failed for {}: {}", entity_id, e);
                return goals.current_symbolic_goal.clone();
            }
        };

        let (name, score) = best_goal(
            &goals.symbolic_goals,
            &context_embedding,
            identity.map(|i| i.embedding.as_slice()),
        )?;
        tracing::debug!("{} scored goal '{}' highest ({:.3})", entity_id, name, score);
        Some(name)
    }
}

/// `2·cos(context, goal) + 1.5·mean(history) + 1·cos(identity, goal)`;
/// an agent without identity contributes a neutral 0.5
pub fn goal_score(goal: &SymbolicGoal, context: &[f32], identity: Option<&[f32]>) -> f32 {
    let context_similarity = cosine_similarity(context, &goal.embedding);
    let history = mean(&goal.success_history).unwrap_or(0.0);
    let identity_similarity = identity.map_or(0.5, |id| cosine_similarity(id, &goal.embedding));
    CONTEXT_WEIGHT * context_similarity + HISTORY_WEIGHT * history + IDENTITY_WEIGHT * identity_similarity
}

/// Highest-scoring goal; the earliest goal wins ties
pub fn best_goal(goals: &[SymbolicGoal], context: &[f32], identity: Option<&[f32]>) -> Option<(String, f32)> {
    let mut best: Option<(&SymbolicGoal, f32)> = None;
    for goal in goals {
        let score = goal_score(goal, context, identity);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((goal, score)),
        }
    }
    best.map(|(goal, score)| (goal.name.clone(), score))
}

impl System for GoalSystem {
    fn name(&self) -> &str {
        "GoalSystem"
    }

    fn update(&self, _state: &mut SimulationState, _tick: Tick) -> Result<()> {
        Ok(())
    }
}
