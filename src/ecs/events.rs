//! Events exchanged over the event bus
//!
//! Every event maps to a topic string. Handlers subscribe to topics and
//! receive the whole event.

use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::actions::{ActionOutcome, ActionPlan};
use crate::core::types::{EntityId, Tick};

pub use crate::cognition::identity::SocialFeedback;

pub mod topics {
    pub const ACTION_CHOSEN: &str = "action_chosen";
    pub const ACTION_OUTCOME_READY: &str = "action_outcome_ready";
    pub const ACTION_EXECUTED: &str = "action_executed";
    pub const REFLECTION_REQUESTED: &str = "reflection_requested_by_action";
    pub const REFLECTION_VALIDATED: &str = "reflection_validated";
    pub const UPDATE_GOALS: &str = "update_goals_event";
    pub const REFLECTION_COMPLETED: &str = "reflection_completed";
    pub const Q_LEARNING_UPDATE: &str = "q_learning_update";

    /// Topic a world executor listens on for one action
    pub fn execute_action(action_id: &str) -> String {
        format!("execute_{}_action", action_id)
    }
}

/// What a reflection produced, handed to the goal and identity systems
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReflectionContext {
    pub narrative: String,
    pub llm_final_account: String,
    pub social_feedback: Option<SocialFeedback>,
    /// World-specific context fields
    pub extras: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ActionChosen {
        entity_id: EntityId,
        plan: ActionPlan,
        tick: Tick,
    },
    ExecuteAction {
        entity_id: EntityId,
        plan: ActionPlan,
        tick: Tick,
    },
    ActionOutcomeReady {
        entity_id: EntityId,
        plan: ActionPlan,
        outcome: ActionOutcome,
        tick: Tick,
    },
    ActionExecuted {
        event_id: String,
        entity_id: EntityId,
        plan: ActionPlan,
        outcome: ActionOutcome,
        tick: Tick,
    },
    ReflectionRequested {
        entity_id: EntityId,
        tick: Tick,
        is_final: bool,
    },
    ReflectionValidated {
        entity_id: EntityId,
        reflection_text: String,
        confidence: f32,
        tick: Tick,
    },
    UpdateGoals {
        entity_id: EntityId,
        narrative: String,
        tick: Tick,
    },
    ReflectionCompleted {
        entity_id: EntityId,
        tick: Tick,
        context: ReflectionContext,
    },
    QLearningUpdate {
        entity_id: EntityId,
        loss: f32,
        tick: Tick,
    },
    Custom {
        topic: String,
        payload: serde_json::Value,
    },
}

impl Event {
    pub fn topic(&self) -> Cow<'_, str> {
        match self {
            Event::ActionChosen { .. } => Cow::Borrowed(topics::ACTION_CHOSEN),
            Event::ExecuteAction { plan, .. } => Cow::Owned(topics::execute_action(&plan.action_id)),
            Event::ActionOutcomeReady { .. } => Cow::Borrowed(topics::ACTION_OUTCOME_READY),
            Event::ActionExecuted { .. } => Cow::Borrowed(topics::ACTION_EXECUTED),
            Event::ReflectionRequested { .. } => Cow::Borrowed(topics::REFLECTION_REQUESTED),
            Event::ReflectionValidated { .. } => Cow::Borrowed(topics::REFLECTION_VALIDATED),
            Event::UpdateGoals { .. } => Cow::Borrowed(topics::UPDATE_GOALS),
            Event::ReflectionCompleted { .. } => Cow::Borrowed(topics::REFLECTION_COMPLETED),
            Event::QLearningUpdate { .. } => Cow::Borrowed(topics::Q_LEARNING_UPDATE),
            Event::Custom { topic, .. } => Cow::Borrowed(topic.as_str()),
        }
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Event::ActionChosen { entity_id, .. }
            | Event::ExecuteAction { entity_id, .. }
            | Event::ActionOutcomeReady { entity_id, .. }
            | Event::ActionExecuted { entity_id, .. }
            | Event::ReflectionRequested { entity_id, .. }
            | Event::ReflectionValidated { entity_id, .. }
            | Event::UpdateGoals { entity_id, .. }
            | Event::ReflectionCompleted { entity_id, .. }
            | Event::QLearningUpdate { entity_id, .. } => Some(entity_id),
            Event::Custom { .. } => None,
        }
    }

    pub fn tick(&self) -> Option<Tick> {
        match self {
            Event::ActionChosen { tick, .. }
            | Event::ExecuteAction { tick, .. }
            | Event::ActionOutcomeReady { tick, .. }
            | Event::ActionExecuted { tick, .. }
            | Event::ReflectionRequested { tick, .. }
            | Event::ReflectionValidated { tick, .. }
            | Event::UpdateGoals { tick, .. }
            | Event::ReflectionCompleted { tick, .. }
            | Event::QLearningUpdate { tick, .. } => Some(*tick),
            Event::Custom { .. } => None,
        }
    }

    /// JSON payload for exporters
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_topic_names_action() {
        let event = Event::ExecuteAction {
            entity_id: EntityId::new("a"),
            plan: ActionPlan::new("forage"),
            tick: 3,
        };
        assert_eq!(event.topic(), "execute_forage_action");
        assert_eq!(event.tick(), Some(3));
    }

    #[test]
    fn test_payload_is_tagged() {
        let event = Event::QLearningUpdate {
            entity_id: EntityId::new("a"),
            loss: 0.5,
            tick: 1,
        };
        let value = event.to_value();
        assert_eq!(value["event"], "q_learning_update");
        assert_eq!(value["entity_id"], "a");
    }

    #[test]
    fn test_custom_topic() {
        let event = Event::Custom {
            topic: "weather_changed".into(),
            payload: serde_json::json!({"rain": true}),
        };
        assert_eq!(event.topic(), "weather_changed");
        assert!(event.entity_id().is_none());
    }
}
