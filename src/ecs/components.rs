//! Core agent components
//!
//! World-agnostic state every cognitive agent may carry. World packages add
//! their own components next to these.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::actions::{ActionPlan, Intent};
use crate::cognition::affect::{AffectiveExperience, LearnedEmotion};
use crate::cognition::causal::{CausalGraph, CausalModel, CausalRecord};
use crate::cognition::identity::MultiDomainIdentity;
use crate::cognition::reflection::{CounterfactualEpisode, Episode};
use crate::cognition::utility::UtilityNetwork;
use crate::core::math::l2_norm;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;

// ============================================================================
// Engine utility components
// ============================================================================

/// Capacity to act; an agent with no budget is inactive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBudgetComponent {
    pub initial_time_budget: f32,
    pub max_time_budget: f32,
    pub current_time_budget: f32,
    pub is_active: bool,
    #[serde(default)]
    pub action_counts: BTreeMap<String, u32>,
}

impl TimeBudgetComponent {
    pub fn new(initial_time_budget: f32) -> Self {
        Self {
            initial_time_budget,
            max_time_budget: initial_time_budget * 2.0,
            current_time_budget: initial_time_budget,
            is_active: true,
            action_counts: BTreeMap::new(),
        }
    }

    /// Deduct `cost`, count the action, and settle the active flag
    pub fn spend(&mut self, action_id: &str, cost: f32) {
        self.current_time_budget -= cost;
        *self.action_counts.entry(action_id.to_string()).or_insert(0) += 1;
        self.auto_fix(&EntityId::new(""));
    }
}

impl ComponentKind for TimeBudgetComponent {
    const NAME: &'static str = "TimeBudgetComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if self.initial_time_budget <= 0.0 {
            errors.push(format!("initial_time_budget must be > 0, got {}", self.initial_time_budget));
        }
        if self.current_time_budget < 0.0 {
            errors.push(format!("current_time_budget cannot be negative, got {}", self.current_time_budget));
        }
        if self.max_time_budget <= 0.0 {
            errors.push(format!("max_time_budget must be > 0, got {}", self.max_time_budget));
        }
        if self.is_active && self.current_time_budget <= 0.0 {
            errors.push(format!(
                "Entity marked active but has no time budget ({})",
                self.current_time_budget
            ));
        }
        if !self.is_active && self.current_time_budget > 0.0 {
            errors.push(format!(
                "Entity marked inactive but has time budget ({})",
                self.current_time_budget
            ));
        }
        // slight overshoot is float noise
        if self.current_time_budget > self.max_time_budget * 1.1 {
            errors.push(format!(
                "current_time_budget ({}) exceeds max ({})",
                self.current_time_budget, self.max_time_budget
            ));
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        if self.current_time_budget < 0.0 {
            self.current_time_budget = 0.0;
            self.is_active = false;
            fixed = true;
        }
        if self.is_active && self.current_time_budget <= 0.0 {
            self.is_active = false;
            fixed = true;
        }
        if !self.is_active
            && self.current_time_budget > 0.0
            && self.current_time_budget < self.initial_time_budget * 0.1
        {
            self.current_time_budget = 0.0;
            fixed = true;
        }
        if self.current_time_budget > self.max_time_budget {
            self.current_time_budget = self.max_time_budget;
            fixed = true;
        }
        fixed
    }
}

/// The plan chosen for the current tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlanComponent {
    pub plan: Option<ActionPlan>,
}

impl ActionPlanComponent {
    pub fn new(plan: ActionPlan) -> Self {
        Self { plan: Some(plan) }
    }

    pub fn intent(&self) -> Option<Intent> {
        self.plan.as_ref().map(|p| p.intent)
    }
}

impl ComponentKind for ActionPlanComponent {
    const NAME: &'static str = "ActionPlanComponent";
}

/// Result of the last executed action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcomeComponent {
    pub success: bool,
    pub reward: f32,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ComponentKind for ActionOutcomeComponent {
    const NAME: &'static str = "ActionOutcomeComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        if self.reward.is_finite() {
            Vec::new()
        } else {
            vec!["Outcome reward is not a finite number.".to_string()]
        }
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        if self.reward.is_finite() {
            return false;
        }
        self.reward = 0.0;
        true
    }
}

/// Other entities the agent currently perceives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionComponent {
    pub vision_range: i32,
    #[serde(default)]
    pub visible_entities: BTreeMap<EntityId, serde_json::Value>,
}

impl PerceptionComponent {
    pub fn new(vision_range: i32) -> Self {
        Self {
            vision_range,
            visible_entities: BTreeMap::new(),
        }
    }
}

impl ComponentKind for PerceptionComponent {
    const NAME: &'static str = "PerceptionComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        if self.vision_range < 0 {
            vec!["Vision range cannot be negative.".to_string()]
        } else {
            Vec::new()
        }
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        if self.vision_range >= 0 {
            return false;
        }
        self.vision_range = 0;
        self.visible_entities.clear();
        true
    }
}

// ============================================================================
// Cognitive components
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionComponent {
    /// [-1, 1]
    pub valence: f32,
    /// [0, 1]
    pub arousal: f32,
    pub current_emotion_category: String,
}

impl Default for EmotionComponent {
    fn default() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.5,
            current_emotion_category: "neutral".to_string(),
        }
    }
}

impl ComponentKind for EmotionComponent {
    const NAME: &'static str = "EmotionComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if !(-1.0..=1.0).contains(&self.valence) {
            errors.push("Valence out of bounds.".to_string());
        }
        if !(0.0..=1.0).contains(&self.arousal) {
            errors.push("Arousal out of bounds.".to_string());
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let valence = if self.valence.is_nan() { 0.0 } else { self.valence.clamp(-1.0, 1.0) };
        let arousal = if self.arousal.is_nan() { 0.5 } else { self.arousal.clamp(0.0, 1.0) };
        let fixed = valence != self.valence || arousal != self.arousal;
        self.valence = valence;
        self.arousal = arousal;
        fixed
    }
}

/// Prediction-error state, dissonance and the emotion-discovery buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectComponent {
    pub prediction_delta_magnitude: f32,
    pub predictive_delta_smooth: f32,
    pub cognitive_dissonance: f32,
    pub prev_reward: f32,
    pub affective_buffer_maxlen: usize,
    #[serde(default)]
    pub affective_experience_buffer: VecDeque<AffectiveExperience>,
    #[serde(default)]
    pub learned_emotion_clusters: BTreeMap<String, LearnedEmotion>,
}

impl AffectComponent {
    pub fn new(affective_buffer_maxlen: usize) -> Self {
        Self {
            prediction_delta_magnitude: 0.0,
            predictive_delta_smooth: 0.5,
            cognitive_dissonance: 0.0,
            prev_reward: 0.0,
            affective_buffer_maxlen,
            affective_experience_buffer: VecDeque::new(),
            learned_emotion_clusters: BTreeMap::new(),
        }
    }

    /// Append, dropping the oldest experience once full
    pub fn push_experience(&mut self, experience: AffectiveExperience) {
        if self.affective_buffer_maxlen == 0 {
            return;
        }
        while self.affective_experience_buffer.len() >= self.affective_buffer_maxlen {
            self.affective_experience_buffer.pop_front();
        }
        self.affective_experience_buffer.push_back(experience);
    }
}

impl ComponentKind for AffectComponent {
    const NAME: &'static str = "AffectComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.cognitive_dissonance.is_finite() {
            errors.push("Cognitive dissonance is not a finite number.".to_string());
        }
        if self.affective_experience_buffer.len() > self.affective_buffer_maxlen {
            errors.push(format!(
                "affective buffer holds {} experiences, max {}",
                self.affective_experience_buffer.len(),
                self.affective_buffer_maxlen
            ));
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        if !self.cognitive_dissonance.is_finite() {
            self.cognitive_dissonance = 0.0;
            fixed = true;
        }
        while self.affective_experience_buffer.len() > self.affective_buffer_maxlen {
            self.affective_experience_buffer.pop_front();
            fixed = true;
        }
        fixed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicGoal {
    pub name: String,
    pub embedding: Vec<f32>,
    pub success_history: Vec<f32>,
    pub last_updated_tick: Tick,
}

/// Invented goals, kept in invention order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalComponent {
    pub embedding_dim: usize,
    pub current_symbolic_goal: Option<String>,
    #[serde(default)]
    pub symbolic_goals: Vec<SymbolicGoal>,
}

impl GoalComponent {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            current_symbolic_goal: None,
            symbolic_goals: Vec::new(),
        }
    }

    pub fn goal(&self, name: &str) -> Option<&SymbolicGoal> {
        self.symbolic_goals.iter().find(|g| g.name == name)
    }

    pub fn goal_mut(&mut self, name: &str) -> Option<&mut SymbolicGoal> {
        self.symbolic_goals.iter_mut().find(|g| g.name == name)
    }

    pub fn current_goal(&self) -> Option<&SymbolicGoal> {
        self.current_symbolic_goal.as_deref().and_then(|name| self.goal(name))
    }
}

impl ComponentKind for GoalComponent {
    const NAME: &'static str = "GoalComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        match &self.current_symbolic_goal {
            Some(goal) if self.goal(goal).is_none() => {
                vec![format!("Current goal '{}' not in goal data.", goal)]
            }
            _ => Vec::new(),
        }
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        if self.validate(&EntityId::new("")).is_empty() {
            return false;
        }
        self.current_symbolic_goal = None;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityComponent {
    pub multi_domain_identity: MultiDomainIdentity,
    /// Cached global identity embedding
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub salient_traits_cache: BTreeMap<String, f32>,
    #[serde(default)]
    pub identity_coherence_history: Vec<f32>,
    pub last_identity_update_tick: Tick,
    pub identity_change_resistance: f32,
}

impl IdentityComponent {
    pub fn new(multi_domain_identity: MultiDomainIdentity) -> Self {
        let embedding = multi_domain_identity.global_embedding();
        Self {
            multi_domain_identity,
            embedding,
            salient_traits_cache: BTreeMap::new(),
            identity_coherence_history: Vec::new(),
            last_identity_update_tick: 0,
            identity_change_resistance: 0.5,
        }
    }

    pub fn refresh_embedding(&mut self) {
        self.embedding = self.multi_domain_identity.global_embedding();
    }

    pub fn coherence(&self) -> f32 {
        self.multi_domain_identity.coherence()
    }

    pub fn stability(&self) -> f32 {
        self.multi_domain_identity.stability()
    }
}

impl ComponentKind for IdentityComponent {
    const NAME: &'static str = "IdentityComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if self.embedding.len() != self.multi_domain_identity.embedding_dim {
            errors.push(format!(
                "embedding has {} dims, identity expects {}",
                self.embedding.len(),
                self.multi_domain_identity.embedding_dim
            ));
        }
        if self.embedding.iter().any(|x| !x.is_finite()) {
            errors.push("embedding contains non-finite values".to_string());
        }
        errors
    }

    fn auto_fix(&mut self, entity_id: &EntityId) -> bool {
        if self.validate(entity_id).is_empty() {
            return false;
        }
        self.refresh_embedding();
        true
    }
}

/// One executed action as stored in memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub tick: Tick,
    pub event_id: String,
    pub action_id: String,
    pub intent: Intent,
    pub success: bool,
    /// Final reward of the action
    pub outcome: f32,
    pub status: String,
}

impl MemoryEntry {
    pub fn summary(&self) -> String {
        let status = if self.status.is_empty() { "unknown" } else { self.status.as_str() };
        format!("Action '{}' led to outcome '{}'", self.action_id, status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryComponent {
    #[serde(default)]
    pub episodic_memory: Vec<MemoryEntry>,
    #[serde(default)]
    pub short_term_memory: VecDeque<MemoryEntry>,
    pub short_term_memory_maxlen: usize,
    #[serde(default)]
    pub last_llm_reflection_summary: String,
    #[serde(default)]
    pub counterfactual_memories: Vec<CounterfactualEpisode>,
    #[serde(default)]
    pub causal_data: Vec<CausalRecord>,
    #[serde(default)]
    pub causal_graph: CausalGraph,
    #[serde(default)]
    pub causal_model: Option<CausalModel>,
}

impl MemoryComponent {
    pub fn new(short_term_memory_maxlen: usize) -> Self {
        Self {
            episodic_memory: Vec::new(),
            short_term_memory: VecDeque::new(),
            short_term_memory_maxlen,
            last_llm_reflection_summary: String::new(),
            counterfactual_memories: Vec::new(),
            causal_data: Vec::new(),
            causal_graph: CausalGraph::new(),
            causal_model: None,
        }
    }

    /// Store in both episodic and bounded short-term memory
    pub fn record(&mut self, entry: MemoryEntry) {
        if self.short_term_memory_maxlen > 0 {
            while self.short_term_memory.len() >= self.short_term_memory_maxlen {
                self.short_term_memory.pop_front();
            }
            self.short_term_memory.push_back(entry.clone());
        }
        self.episodic_memory.push(entry);
    }
}

impl ComponentKind for MemoryComponent {
    const NAME: &'static str = "MemoryComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        if self.short_term_memory.len() > self.short_term_memory_maxlen {
            vec![format!(
                "short-term memory holds {} entries, max {}",
                self.short_term_memory.len(),
                self.short_term_memory_maxlen
            )]
        } else {
            Vec::new()
        }
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        while self.short_term_memory.len() > self.short_term_memory_maxlen {
            self.short_term_memory.pop_front();
            fixed = true;
        }
        fixed
    }
}

/// Confidence in reflections (by tick) and in the causal model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationComponent {
    #[serde(default)]
    pub reflection_confidence_scores: BTreeMap<Tick, f32>,
    pub causal_model_confidence: f32,
}

impl ComponentKind for ValidationComponent {
    const NAME: &'static str = "ValidationComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.causal_model_confidence) {
            errors.push(format!(
                "causal_model_confidence {} outside [0, 1]",
                self.causal_model_confidence
            ));
        }
        for (tick, score) in &self.reflection_confidence_scores {
            if !(0.0..=1.0).contains(score) {
                errors.push(format!("reflection confidence at tick {} outside [0, 1]", tick));
            }
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        let causal = clamp(self.causal_model_confidence);
        if causal != self.causal_model_confidence {
            self.causal_model_confidence = causal;
            fixed = true;
        }
        for score in self.reflection_confidence_scores.values_mut() {
            let clamped = clamp(*score);
            if clamped != *score {
                *score = clamped;
                fixed = true;
            }
        }
        fixed
    }
}

/// Objective count of what the agent has done
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetenceComponent {
    #[serde(default)]
    pub action_counts: BTreeMap<String, u32>,
}

impl CompetenceComponent {
    pub fn increment(&mut self, action_id: &str) {
        *self.action_counts.entry(action_id.to_string()).or_insert(0) += 1;
    }
}

impl ComponentKind for CompetenceComponent {
    const NAME: &'static str = "CompetenceComponent";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeComponent {
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl ComponentKind for EpisodeComponent {
    const NAME: &'static str = "EpisodeComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        self.episodes
            .iter()
            .filter(|e| e.end_tick < e.start_tick)
            .map(|e| format!("episode '{}' ends before it starts", e.theme))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub statement: String,
    pub confidence: f32,
    pub source_reflection_tick: Tick,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeliefSystemComponent {
    #[serde(default)]
    pub belief_base: BTreeMap<String, Belief>,
    #[serde(default)]
    pub rule_base: Vec<String>,
    #[serde(default)]
    pub social_norms: BTreeMap<String, f32>,
}

impl ComponentKind for BeliefSystemComponent {
    const NAME: &'static str = "BeliefSystemComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        self.belief_base
            .iter()
            .filter(|(_, b)| !(0.0..=1.0).contains(&b.confidence))
            .map(|(key, _)| format!("belief '{}' has confidence outside [0, 1]", key))
            .collect()
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        for belief in self.belief_base.values_mut() {
            if !(0.0..=1.0).contains(&belief.confidence) {
                belief.confidence = if belief.confidence.is_nan() { 0.0 } else { belief.confidence.clamp(0.0, 1.0) };
                fixed = true;
            }
        }
        fixed
    }
}

/// Subjective view of another agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalSchema {
    pub other_agent_id: EntityId,
    pub impression_valence: f32,
    pub interaction_count: u32,
}

impl RelationalSchema {
    pub fn new(other_agent_id: EntityId) -> Self {
        Self {
            other_agent_id,
            impression_valence: 0.0,
            interaction_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialMemoryComponent {
    pub schema_embedding_dim: usize,
    #[serde(default)]
    pub schemas: BTreeMap<EntityId, RelationalSchema>,
}

impl SocialMemoryComponent {
    pub fn new(schema_embedding_dim: usize) -> Self {
        Self {
            schema_embedding_dim,
            schemas: BTreeMap::new(),
        }
    }

    /// Count an interaction and nudge the impression by `valence_delta`
    pub fn record_interaction(&mut self, other: &EntityId, valence_delta: f32) {
        let schema = self
            .schemas
            .entry(other.clone())
            .or_insert_with(|| RelationalSchema::new(other.clone()));
        schema.interaction_count += 1;
        schema.impression_valence = (schema.impression_valence + valence_delta).clamp(-1.0, 1.0);
    }
}

impl ComponentKind for SocialMemoryComponent {
    const NAME: &'static str = "SocialMemoryComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        self.schemas
            .values()
            .filter(|s| !(-1.0..=1.0).contains(&s.impression_valence))
            .map(|s| format!("impression of {} outside [-1, 1]", s.other_agent_id))
            .collect()
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        for schema in self.schemas.values_mut() {
            if !(-1.0..=1.0).contains(&schema.impression_valence) {
                schema.impression_valence = if schema.impression_valence.is_nan() {
                    0.0
                } else {
                    schema.impression_valence.clamp(-1.0, 1.0)
                };
                fixed = true;
            }
        }
        fixed
    }
}

/// Personal multipliers for subjective rewards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSystemComponent {
    pub combat_victory_multiplier: f32,
    pub collaboration_multiplier: f32,
    pub resource_yield_multiplier: f32,
    pub exploration_multiplier: f32,
    pub risk_tolerance: f32,
}

impl Default for ValueSystemComponent {
    fn default() -> Self {
        Self {
            combat_victory_multiplier: 1.0,
            collaboration_multiplier: 1.0,
            resource_yield_multiplier: 1.0,
            exploration_multiplier: 1.0,
            risk_tolerance: 1.0,
        }
    }
}

impl ValueSystemComponent {
    fn multipliers_mut(&mut self) -> [(&'static str, &mut f32); 5] {
        [
            ("combat_victory_multiplier", &mut self.combat_victory_multiplier),
            ("collaboration_multiplier", &mut self.collaboration_multiplier),
            ("resource_yield_multiplier", &mut self.resource_yield_multiplier),
            ("exploration_multiplier", &mut self.exploration_multiplier),
            ("risk_tolerance", &mut self.risk_tolerance),
        ]
    }
}

impl ComponentKind for ValueSystemComponent {
    const NAME: &'static str = "ValueSystemComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        [
            ("combat_victory_multiplier", self.combat_victory_multiplier),
            ("collaboration_multiplier", self.collaboration_multiplier),
            ("resource_yield_multiplier", self.resource_yield_multiplier),
            ("exploration_multiplier", self.exploration_multiplier),
            ("risk_tolerance", self.risk_tolerance),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_finite() || *v < 0.0)
        .map(|(name, v)| format!("{} must be a non-negative number, got {}", name, v))
        .collect()
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        let mut fixed = false;
        for (_, value) in self.multipliers_mut() {
            if !value.is_finite() || *value < 0.0 {
                *value = 1.0;
                fixed = true;
            }
        }
        fixed
    }
}

/// Exploration state and the utility network; only the scalars persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QLearningComponent {
    pub current_epsilon: f32,
    #[serde(default)]
    pub last_loss: Option<f32>,
    #[serde(skip)]
    pub utility_network: Option<UtilityNetwork>,
}

impl QLearningComponent {
    pub fn new(utility_network: UtilityNetwork, initial_epsilon: f32) -> Self {
        Self {
            current_epsilon: initial_epsilon,
            last_loss: None,
            utility_network: Some(utility_network),
        }
    }

    pub fn decay_epsilon(&mut self, rate: f32, min_epsilon: f32) {
        self.current_epsilon = (self.current_epsilon * rate).max(min_epsilon);
    }
}

impl ComponentKind for QLearningComponent {
    const NAME: &'static str = "QLearningComponent";

    fn validate(&self, _entity_id: &EntityId) -> Vec<String> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.current_epsilon) {
            errors.push(format!("epsilon {} outside [0, 1]", self.current_epsilon));
        }
        match &self.utility_network {
            None => errors.push("utility network is missing".to_string()),
            Some(net) if net.has_non_finite() => errors.push("utility network has non-finite weights".to_string()),
            Some(_) => {}
        }
        errors
    }

    fn auto_fix(&mut self, _entity_id: &EntityId) -> bool {
        if (0.0..=1.0).contains(&self.current_epsilon) {
            return false;
        }
        self.current_epsilon = if self.current_epsilon.is_nan() { 0.1 } else { self.current_epsilon.clamp(0.0, 1.0) };
        true
    }
}

/// True when `v` is a usable, non-zero embedding
pub fn is_usable_embedding(v: &[f32]) -> bool {
    !v.is_empty() && v.iter().all(|x| x.is_finite()) && l2_norm(v) > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Component;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn id() -> EntityId {
        EntityId::new("agent_1")
    }

    #[test]
    fn test_time_budget_spend_and_deactivate() {
        let mut budget = TimeBudgetComponent::new(20.0);
        assert_eq!(budget.max_time_budget, 40.0);
        budget.spend("forage", 10.0);
        assert_eq!(budget.current_time_budget, 10.0);
        assert!(budget.is_active);
        budget.spend("forage", 15.0);
        assert_eq!(budget.current_time_budget, 0.0);
        assert!(!budget.is_active);
        assert_eq!(budget.action_counts["forage"], 2);
        assert!(ComponentKind::validate(&budget, &id()).is_empty());
    }

    #[test]
    fn test_time_budget_auto_fix_rules() {
        let mut budget = TimeBudgetComponent::new(100.0);
        budget.current_time_budget = 500.0;
        assert!(!ComponentKind::validate(&budget, &id()).is_empty());
        assert!(ComponentKind::auto_fix(&mut budget, &id()));
        assert_eq!(budget.current_time_budget, 200.0);

        budget.is_active = false;
        budget.current_time_budget = 5.0;
        assert!(ComponentKind::auto_fix(&mut budget, &id()));
        assert_eq!(budget.current_time_budget, 0.0);
        assert!(!ComponentKind::auto_fix(&mut budget, &id()));
    }

    #[test]
    fn test_emotion_bounds() {
        let mut emotion = EmotionComponent {
            valence: 1.5,
            arousal: -0.1,
            current_emotion_category: "neutral".into(),
        };
        assert_eq!(ComponentKind::validate(&emotion, &id()).len(), 2);
        assert!(ComponentKind::auto_fix(&mut emotion, &id()));
        assert_eq!((emotion.valence, emotion.arousal), (1.0, 0.0));
    }

    #[test]
    fn test_goal_must_exist() {
        let mut goal = GoalComponent::new(4);
        goal.current_symbolic_goal = Some("gather food".into());
        assert_eq!(ComponentKind::validate(&goal, &id()).len(), 1);
        assert!(ComponentKind::auto_fix(&mut goal, &id()));
        assert!(goal.current_symbolic_goal.is_none());
    }

    #[test]
    fn test_memory_short_term_is_bounded() {
        let mut memory = MemoryComponent::new(2);
        for tick in 0..4 {
            memory.record(MemoryEntry {
                tick,
                event_id: format!("e{}", tick),
                action_id: "rest".into(),
                intent: Intent::Solitary,
                success: true,
                outcome: 1.0,
                status: String::new(),
            });
        }
        assert_eq!(memory.episodic_memory.len(), 4);
        assert_eq!(memory.short_term_memory.len(), 2);
        assert_eq!(memory.short_term_memory[0].tick, 2);
        assert_eq!(memory.episodic_memory[0].summary(), "Action 'rest' led to outcome 'unknown'");
    }

    #[test]
    fn test_social_memory_interactions() {
        let mut social = SocialMemoryComponent::new(8);
        let other = EntityId::new("agent_2");
        social.record_interaction(&other, 0.8);
        social.record_interaction(&other, 0.8);
        let schema = &social.schemas[&other];
        assert_eq!(schema.interaction_count, 2);
        assert_eq!(schema.impression_valence, 1.0);
    }

    #[test]
    fn test_value_system_auto_fix() {
        let mut values = ValueSystemComponent {
            risk_tolerance: -2.0,
            ..Default::default()
        };
        assert_eq!(ComponentKind::validate(&values, &id()).len(), 1);
        assert!(ComponentKind::auto_fix(&mut values, &id()));
        assert_eq!(values.risk_tolerance, 1.0);
    }

    #[test]
    fn test_q_learning_persists_only_scalars() {
        let net = UtilityNetwork::new(2, 2, 2, 0.001, 0);
        let q = QLearningComponent::new(net, 0.2);
        let value = Component::to_value(&q);
        assert_eq!(value.as_object().unwrap().len(), 2);
        let restored: QLearningComponent = serde_json::from_value(value).unwrap();
        assert!(restored.utility_network.is_none());
        assert_eq!(ComponentKind::validate(&restored, &id()), vec!["utility network is missing".to_string()]);
    }

    #[test]
    fn test_identity_component_round_trips() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let identity = IdentityComponent::new(MultiDomainIdentity::new(4, &mut rng));
        assert!(ComponentKind::validate(&identity, &id()).is_empty());
        let value = Component::to_value(&identity);
        let restored: IdentityComponent = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(Component::to_value(&restored), value);
    }
}
