//! Snapshot types and the JSON file store
//!
//! A snapshot captures one tick of a run: every agent with every component
//! serialized under its type tag, plus the environment's own state. Loading
//! checks structure before deserializing so callers can tell a missing file
//! from bad JSON from a document of the wrong shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{ArlaError, Result};
use crate::core::types::Tick;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub component_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub components: Vec<ComponentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub simulation_id: String,
    pub current_tick: Tick,
    pub agents: Vec<AgentSnapshot>,
    #[serde(default)]
    pub environment_state: Option<Value>,
}

impl SimulationSnapshot {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Check a raw JSON document against the snapshot layout
    pub fn check_schema(value: &Value) -> std::result::Result<(), String> {
        let root = value.as_object().ok_or("top level is not an object")?;
        match root.get("simulation_id") {
            Some(Value::String(_)) => {}
            Some(_) => return Err("simulation_id must be a string".into()),
            None => return Err("missing field 'simulation_id'".into()),
        }
        match root.get("current_tick") {
            Some(v) if v.is_u64() => {}
            Some(_) => return Err("current_tick must be a non-negative integer".into()),
            None => return Err("missing field 'current_tick'".into()),
        }
        match root.get("environment_state") {
            None | Some(Value::Null) | Some(Value::Object(_)) => {}
            Some(_) => return Err("environment_state must be an object or null".into()),
        }

        let agents = root
            .get("agents")
            .ok_or("missing field 'agents'")?
            .as_array()
            .ok_or("agents must be an array")?;
        for (i, agent) in agents.iter().enumerate() {
            let agent = agent
                .as_object()
                .ok_or_else(|| format!("agents[{}] is not an object", i))?;
            if !agent.get("agent_id").map_or(false, Value::is_string) {
                return Err(format!("agents[{}].agent_id must be a string", i));
            }
            let components = agent
                .get("components")
                .and_then(Value::as_array)
                .ok_or_else(|| format!("agents[{}].components must be an array", i))?;
            for (j, component) in components.iter().enumerate() {
                let ok = component
                    .get("component_type")
                    .map_or(false, Value::is_string)
                    && component.get("data").is_some();
                if !ok {
                    return Err(format!(
                        "agents[{}].components[{}] needs component_type and data",
                        i, j
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Summary of one run, written next to its snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub simulation_id: String,
    pub random_seed: u64,
    pub steps: u64,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub final_tick: Tick,
    pub ticks_run: u64,
    pub entity_count: usize,
    pub stopped_early: bool,
}

/// Where the engine sends snapshots
pub trait StateStore {
    fn save(&self, snapshot: &SimulationSnapshot) -> Result<PathBuf>;
    fn load(&self, path: &Path) -> Result<SimulationSnapshot>;

    fn save_manifest(&self, _manifest: &RunManifest) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Pretty-printed JSON files, one per saved tick
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Snapshots land in `<root>/<simulation_id>/snapshots/`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_directory(&self, simulation_id: &str) -> PathBuf {
        self.root.join(simulation_id)
    }

    pub fn snapshot_path(&self, simulation_id: &str, tick: Tick) -> PathBuf {
        self.run_directory(simulation_id)
            .join("snapshots")
            .join(format!("snapshot_tick_{}.json", tick))
    }

    /// Newest snapshot of a run, by tick
    pub fn latest(&self, simulation_id: &str) -> Result<Option<PathBuf>> {
        let dir = self.run_directory(simulation_id).join("snapshots");
        if !dir.exists() {
            return Ok(None);
        }
        let mut best: Option<(Tick, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let tick = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("snapshot_tick_"))
                .and_then(|s| s.parse::<Tick>().ok());
            if let Some(tick) = tick {
                if best.as_ref().map_or(true, |(t, _)| tick > *t) {
                    best = Some((tick, path));
                }
            }
        }
        Ok(best.map(|(_, path)| path))
    }
}

impl StateStore for FileStateStore {
    fn save(&self, snapshot: &SimulationSnapshot) -> Result<PathBuf> {
        let path = self.snapshot_path(&snapshot.simulation_id, snapshot.current_tick);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(snapshot)?)?;
        tracing::info!("Saved snapshot for tick {} to {}", snapshot.current_tick, path.display());
        Ok(path)
    }

    fn save_manifest(&self, manifest: &RunManifest) -> Result<Option<PathBuf>> {
        let dir = self.run_directory(&manifest.simulation_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join("manifest.json");
        fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
        Ok(Some(path))
    }

    fn load(&self, path: &Path) -> Result<SimulationSnapshot> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArlaError::SnapshotNotFound(display.clone()),
            _ => ArlaError::Io(e),
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|source| ArlaError::MalformedSnapshot {
            path: display.clone(),
            source,
        })?;
        SimulationSnapshot::check_schema(&value).map_err(|reason| ArlaError::SnapshotSchema {
            path: display.clone(),
            reason,
        })?;
        serde_json::from_value(value).map_err(|e| ArlaError::SnapshotSchema {
            path: display,
            reason: e.to_string(),
        })
    }
}
