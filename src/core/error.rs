use thiserror::Error;

use crate::core::types::EntityId;

#[derive(Error, Debug)]
pub enum ArlaError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Entity already exists: {0}")]
    DuplicateEntity(EntityId),

    #[error("Component {component} not found for entity: {entity}")]
    ComponentNotFound {
        entity: EntityId,
        component: &'static str,
    },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Malformed snapshot JSON in {path}: {source}")]
    MalformedSnapshot {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot schema mismatch in {path}: {reason}")]
    SnapshotSchema { path: String, reason: String },

    #[error("Component factory error: {0}")]
    ComponentFactory(String),

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error("Causal model error: {0}")]
    Causal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ArlaError {
    pub fn missing_component(entity: &EntityId, component: &'static str) -> Self {
        ArlaError::ComponentNotFound {
            entity: entity.clone(),
            component,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArlaError>;
