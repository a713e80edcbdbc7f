//! Actions and the action registry
//!
//! An action knows how to enumerate its parameter variants for an entity,
//! how to execute one of them against the state, and how to describe a
//! variant as a feature vector for the utility network. Actions are
//! registered once at startup into an `ActionRegistry` that is passed to
//! whoever needs it.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{ArlaError, Result};
use crate::core::types::{EntityId, Tick};
use crate::ecs::state::SimulationState;

/// High-level motivation attached to an action plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    #[default]
    Solitary,
    Cooperate,
    Compete,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Solitary => "SOLITARY",
            Intent::Cooperate => "COOPERATE",
            Intent::Compete => "COMPETE",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type ActionParams = serde_json::Map<String, serde_json::Value>;

/// A concrete choice: which action, why, and with what parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub action_id: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub params: ActionParams,
}

impl ActionPlan {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            intent: Intent::Solitary,
            params: ActionParams::new(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    /// String parameter, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Result of executing an action; `reward` starts at `base_reward` and is
/// replaced by the final subjective reward once computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub base_reward: f32,
    pub reward: f32,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ActionOutcome {
    pub fn new(success: bool, message: impl Into<String>, base_reward: f32) -> Self {
        Self {
            success,
            message: message.into(),
            base_reward,
            reward: base_reward,
            details: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// `details["status"]`, empty when absent
    pub fn status(&self) -> &str {
        self.details.get("status").and_then(|v| v.as_str()).unwrap_or("")
    }
}

pub trait Action {
    fn action_id(&self) -> &str;

    fn name(&self) -> &str;

    /// Time budget consumed by one execution
    fn base_cost(&self, _state: &SimulationState) -> f32 {
        1.0
    }

    fn generate_possible_params(&self, entity_id: &EntityId, state: &SimulationState, tick: Tick) -> Vec<ActionParams>;

    fn execute(
        &self,
        state: &mut SimulationState,
        entity_id: &EntityId,
        plan: &ActionPlan,
        tick: Tick,
    ) -> Result<ActionOutcome>;

    /// Length of `feature_vector` for every variant of this action
    fn feature_dim(&self) -> usize {
        0
    }

    fn feature_vector(&self, _entity_id: &EntityId, _state: &SimulationState, _params: &ActionParams) -> Vec<f32> {
        Vec::new()
    }
}

/// Registered actions in registration order
#[derive(Default)]
pub struct ActionRegistry {
    actions: Vec<Box<dyn Action>>,
    index: AHashMap<String, usize>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry").field("actions", &self.ids()).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Box<dyn Action>) -> Result<()> {
        let id = action.action_id().to_string();
        if id.is_empty() {
            return Err(ArlaError::InvalidAction(format!("action '{}' has an empty id", action.name())));
        }
        if self.index.contains_key(&id) {
            return Err(ArlaError::InvalidAction(format!("action '{}' is already registered", id)));
        }
        tracing::debug!("Registered action '{}' ({})", id, action.name());
        self.index.insert(id, self.actions.len());
        self.actions.push(action);
        Ok(())
    }

    pub fn get(&self, action_id: &str) -> Option<&dyn Action> {
        self.index.get(action_id).map(|&i| self.actions[i].as_ref())
    }

    pub fn index_of(&self, action_id: &str) -> Option<usize> {
        self.index.get(action_id).copied()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.action_id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Action> {
        self.actions.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn max_feature_dim(&self) -> usize {
        self.actions.iter().map(|a| a.feature_dim()).max().unwrap_or(0)
    }

    /// Width of an encoded action: one-hot block plus padded features
    pub fn action_feature_dim(&self) -> usize {
        self.len() + self.max_feature_dim()
    }

    /// One-hot of the action index followed by the action's own features,
    /// zero-padded to the widest action
    pub fn encode(&self, action_id: &str, features: &[f32]) -> Vec<f32> {
        let width = self.max_feature_dim();
        let mut out = vec![0.0; self.len() + width];
        if let Some(i) = self.index_of(action_id) {
            out[i] = 1.0;
        }
        for (slot, value) in out[self.len()..].iter_mut().zip(features) {
            *slot = *value;
        }
        out
    }

    /// One-hot block only, as used by affective experiences
    pub fn one_hot(&self, action_id: &str) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        if let Some(i) = self.index_of(action_id) {
            out[i] = 1.0;
        }
        out
    }

    /// Encoded feature vector for a concrete plan
    pub fn encode_plan(&self, entity_id: &EntityId, state: &SimulationState, plan: &ActionPlan) -> Vec<f32> {
        let features = self
            .get(&plan.action_id)
            .map(|a| a.feature_vector(entity_id, state, &plan.params))
            .unwrap_or_default();
        self.encode(&plan.action_id, &features)
    }
}
