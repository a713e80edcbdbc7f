//! Per-tick simulation metrics, their calculators and the built-in exporters

use serde_json::json;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{EmotionComponent, TimeBudgetComponent};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::providers::{Exporter, Metrics, MetricsCalculator};

pub struct MetricsSystem {
    calculators: Vec<Box<dyn MetricsCalculator>>,
    exporters: Vec<Rc<dyn Exporter>>,
    latest: RefCell<Metrics>,
}

impl MetricsSystem {
    pub fn new(calculators: Vec<Box<dyn MetricsCalculator>>, exporters: Vec<Rc<dyn Exporter>>) -> Rc<Self> {
        Rc::new(Self {
            calculators,
            exporters,
            latest: RefCell::new(Metrics::new()),
        })
    }

    /// Calculators every run starts with
    pub fn default_calculators() -> Vec<Box<dyn MetricsCalculator>> {
        vec![
            Box::new(ActiveAgentsCalculator),
            Box::new(AverageAffectCalculator),
            Box::new(AverageTimeBudgetCalculator),
        ]
    }

    /// Metrics merged on the most recent tick
    pub fn latest(&self) -> Metrics {
        self.latest.borrow().clone()
    }

    fn collect(&self, state: &SimulationState) -> Metrics {
        let mut merged = Metrics::new();
        for calculator in &self.calculators {
            match calculator.calculate(state) {
                Ok(metrics) => merged.extend(metrics),
                Err(e) => tracing::warn!("Metrics calculator {} failed: {}", calculator.name(), e),
            }
        }
        merged
    }
}

impl System for MetricsSystem {
    fn name(&self) -> &str {
        "MetricsSystem"
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        let metrics = self.collect(state);
        for exporter in &self.exporters {
            if let Err(e) = exporter.export_metrics(tick, &metrics) {
                tracing::warn!("Metrics export failed at tick {}: {}", tick, e);
            }
        }
        *self.latest.borrow_mut() = metrics;
        Ok(())
    }
}

// ============================================================================
// Calculators
// ============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub struct ActiveAgentsCalculator;

impl MetricsCalculator for ActiveAgentsCalculator {
    fn name(&self) -> &str {
        "active_agents"
    }

    fn calculate(&self, state: &SimulationState) -> Result<Metrics> {
        let active = state
            .entities_with_components(&[TimeBudgetComponent::NAME])
            .iter()
            .filter(|id| {
                state
                    .get_component::<TimeBudgetComponent>(id)
                    .is_some_and(|b| b.is_active)
            })
            .count();
        Ok(Metrics::from([("active_agents".to_string(), active as f64)]))
    }
}

pub struct AverageAffectCalculator;

impl MetricsCalculator for AverageAffectCalculator {
    fn name(&self) -> &str {
        "average_affect"
    }

    fn calculate(&self, state: &SimulationState) -> Result<Metrics> {
        let (valences, arousals): (Vec<f64>, Vec<f64>) = state
            .entities_with_components(&[EmotionComponent::NAME])
            .iter()
            .filter_map(|id| state.get_component::<EmotionComponent>(id))
            .map(|e| (e.valence as f64, e.arousal as f64))
            .unzip();
        Ok(Metrics::from([
            ("average_valence".to_string(), mean(&valences)),
            ("average_arousal".to_string(), mean(&arousals)),
        ]))
    }
}

pub struct AverageTimeBudgetCalculator;

impl MetricsCalculator for AverageTimeBudgetCalculator {
    fn name(&self) -> &str {
        "average_time_budget"
    }

    fn calculate(&self, state: &SimulationState) -> Result<Metrics> {
        let budgets: Vec<f64> = state
            .entities_with_components(&[TimeBudgetComponent::NAME])
            .iter()
            .filter_map(|id| state.get_component::<TimeBudgetComponent>(id))
            .map(|b| b.current_time_budget as f64)
            .collect();
        Ok(Metrics::from([("average_time_budget".to_string(), mean(&budgets))]))
    }
}

// ============================================================================
// Exporters
// ============================================================================

/// Appends one JSON object per call to a file
#[derive(Debug)]
pub struct JsonlExporter {
    path: PathBuf,
    writer: RefCell<LineWriter<File>>,
}

impl JsonlExporter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: RefCell::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, record: serde_json::Value) -> Result<()> {
        let mut writer = self.writer.borrow_mut();
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl Exporter for JsonlExporter {
    fn log_event(&self, tick: Tick, topic: &str, payload: &serde_json::Value) -> Result<()> {
        self.write(json!({ "kind": "event", "tick": tick, "topic": topic, "payload": payload }))
    }

    fn export_metrics(&self, tick: Tick, metrics: &Metrics) -> Result<()> {
        self.write(json!({ "kind": "metrics", "tick": tick, "metrics": metrics }))
    }

    fn log_learning_curve(&self, entity_id: &EntityId, tick: Tick, loss: f32) -> Result<()> {
        self.write(json!({ "kind": "learning_curve", "tick": tick, "entity_id": entity_id, "loss": loss }))
    }

    fn log_agent_state(&self, entity_id: &EntityId, tick: Tick, components: &serde_json::Value) -> Result<()> {
        self.write(json!({ "kind": "agent_state", "tick": tick, "entity_id": entity_id, "components": components }))
    }
}

/// Reports metrics through `tracing`
#[derive(Debug, Default)]
pub struct TracingExporter;

impl Exporter for TracingExporter {
    fn export_metrics(&self, tick: Tick, metrics: &Metrics) -> Result<()> {
        let line = metrics
            .iter()
            .map(|(k, v)| format!("{}={:.3}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!("tick {} metrics: {}", tick, line);
        Ok(())
    }

    fn log_learning_curve(&self, entity_id: &EntityId, tick: Tick, loss: f32) -> Result<()> {
        tracing::trace!("{} loss {:.4} at tick {}", entity_id, loss, tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ArlaError;

    struct Failing;

    impl MetricsCalculator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn calculate(&self, _state: &SimulationState) -> Result<Metrics> {
            Err(ArlaError::Config("no data".into()))
        }
    }

    fn populated() -> SimulationState {
        let mut state = SimulationState::new(0);
        for (name, budget, valence, active) in [("a", 40.0, 0.5, true), ("b", 60.0, -0.1, true), ("c", 0.0, 0.0, false)] {
            let id = EntityId::new(name);
            state.add_entity(id.clone()).unwrap();
            let mut time = TimeBudgetComponent::new(100.0);
            time.current_time_budget = budget;
            time.is_active = active;
            state.add_component(&id, time).unwrap();
            state
                .add_component(
                    &id,
                    EmotionComponent {
                        valence,
                        arousal: 0.5,
                        current_emotion_category: "neutral".into(),
                    },
                )
                .unwrap();
        }
        state
    }

    #[test]
    fn test_builtin_calculators() {
        let mut state = populated();
        let system = MetricsSystem::new(MetricsSystem::default_calculators(), Vec::new());
        system.update(&mut state, 1).unwrap();
        let metrics = system.latest();
        assert_eq!(metrics["active_agents"], 2.0);
        assert!((metrics["average_time_budget"] - 100.0 / 3.0).abs() < 1e-9);
        assert!((metrics["average_valence"] - 0.4 / 3.0).abs() < 1e-6);
        assert!((metrics["average_arousal"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_failing_calculator_is_skipped() {
        let mut state = populated();
        let calculators: Vec<Box<dyn MetricsCalculator>> = vec![Box::new(Failing), Box::new(ActiveAgentsCalculator)];
        let system = MetricsSystem::new(calculators, Vec::new());
        system.update(&mut state, 0).unwrap();
        assert_eq!(system.latest().len(), 1);
    }

    #[test]
    fn test_jsonl_exporter_appends_lines() {
        let path = std::env::temp_dir().join(format!("arla_metrics_{}.jsonl", uuid::Uuid::new_v4()));
        let exporter = JsonlExporter::create(&path).unwrap();
        let metrics = Metrics::from([("active_agents".to_string(), 2.0)]);
        exporter.export_metrics(3, &metrics).unwrap();
        exporter.log_learning_curve(&EntityId::new("a"), 3, 0.5).unwrap();
        drop(exporter);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["metrics"]["active_agents"], 2.0);
        assert_eq!(lines[1]["kind"], "learning_curve");
        std::fs::remove_file(&path).ok();
    }
}
