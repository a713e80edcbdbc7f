//! Causal structure learned from experience
//!
//! Two complementary views:
//! - `CausalGraph`: a symbolic, weighted state -> outcome -> state graph
//!   that is reinforced by salient events and decays over time.
//! - `CausalModel`: a backdoor-adjusted linear model of reward on action,
//!   controlling for the discretised state features that confound both.
//!   It answers "what reward should I expect if I *do* this action?"

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::error::{ArlaError, Result};
use crate::core::math::standard_normal;

const RIDGE: f64 = 1e-6;

/// Symbolic node label, e.g. `STATE|high_health|wilderness`
pub fn node_key<S: AsRef<str>>(parts: &[S]) -> String {
    parts.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join("|")
}

pub fn outcome_node(action_id: &str, success: bool) -> String {
    node_key(&["OUTCOME", action_id, if success { "success" } else { "failure" }])
}

/// Weight of one observed transition
pub fn link_weight(reward: f32, arousal: f32) -> f32 {
    reward.abs() * 0.1 + arousal * 0.5 + 0.1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CausalGraph {
    edges: BTreeMap<String, BTreeMap<String, f32>>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight` to the edge, creating it if needed
    pub fn add_edge(&mut self, from: &str, to: &str, weight: f32) {
        *self
            .edges
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_insert(0.0) += weight;
    }

    pub fn weight(&self, from: &str, to: &str) -> Option<f32> {
        self.edges.get(from).and_then(|targets| targets.get(to)).copied()
    }

    pub fn successors(&self, from: &str) -> impl Iterator<Item = (&str, f32)> {
        self.edges
            .get(from)
            .into_iter()
            .flat_map(|targets| targets.iter().map(|(k, w)| (k.as_str(), *w)))
    }

    /// Multiply every weight by `rate`, drop edges under `threshold` and
    /// sources left without edges. Returns the number of pruned edges.
    pub fn decay_and_prune(&mut self, rate: f32, threshold: f32) -> usize {
        let mut pruned = 0;
        for targets in self.edges.values_mut() {
            for w in targets.values_mut() {
                *w *= rate;
            }
            let before = targets.len();
            targets.retain(|_, w| *w >= threshold);
            pruned += before - targets.len();
        }
        self.edges.retain(|_, targets| !targets.is_empty());
        pruned
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn source_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, f32)> {
        self.edges
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |(to, w)| (from.as_str(), to.as_str(), *w)))
    }
}

/// One flat (state, action, outcome) observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRecord {
    pub action: String,
    pub outcome: f32,
    /// Discretised state features, `state_<i>` -> category
    pub state: BTreeMap<String, String>,
}

impl CausalRecord {
    /// Build from a node tuple; the leading tag (`STATE`) is skipped
    pub fn from_state_node(node: &[String], action: &str, outcome: f32) -> Self {
        let state = node
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, v)| (format!("state_{}", i), v.clone()))
            .collect();
        Self {
            action: action.to_string(),
            outcome,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalModel {
    pub action_levels: Vec<String>,
    pub state_levels: BTreeMap<String, Vec<String>>,
    pub coefficients: Vec<f64>,
    /// E[outcome | do(action)] averaged over the observed states
    pub interventional_means: BTreeMap<String, f64>,
    pub observed_mean: f64,
    pub samples: usize,
}

impl CausalModel {
    pub fn fit(records: &[CausalRecord]) -> Result<Self> {
        fit_with_extra(records, None)
    }

    /// Expected outcome of forcing `action`; `None` for unseen actions
    pub fn estimate(&self, action: &str) -> Option<f32> {
        self.interventional_means.get(action).map(|v| *v as f32)
    }

    fn spread(&self) -> f64 {
        let values: Vec<f64> = self.interventional_means.values().copied().collect();
        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let min = values.iter().copied().fold(f64::MAX, f64::min);
        if values.is_empty() {
            0.0
        } else {
            max - min
        }
    }

    fn effect_vector(&self) -> Vec<f64> {
        self.action_levels
            .iter()
            .map(|a| self.interventional_means.get(a).copied().unwrap_or(0.0) - self.observed_mean)
            .collect()
    }
}

struct Design {
    action_levels: Vec<String>,
    state_levels: BTreeMap<String, Vec<String>>,
}

impl Design {
    fn from_records(records: &[CausalRecord]) -> Self {
        let mut action_levels: Vec<String> = records.iter().map(|r| r.action.clone()).collect();
        action_levels.sort();
        action_levels.dedup();

        let mut state_levels: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for r in records {
            for (k, v) in &r.state {
                state_levels.entry(k.clone()).or_default().push(v.clone());
            }
        }
        for levels in state_levels.values_mut() {
            levels.sort();
            levels.dedup();
        }
        Self {
            action_levels,
            state_levels,
        }
    }

    /// intercept + one-hot(action, first dropped) + one-hot(state, first dropped) + extra
    fn width(&self, extra: bool) -> usize {
        1 + self.action_levels.len().saturating_sub(1)
            + self.state_levels.values().map(|l| l.len().saturating_sub(1)).sum::<usize>()
            + usize::from(extra)
    }

    fn row(&self, action: &str, state: &BTreeMap<String, String>, extra: Option<f64>) -> Vec<f64> {
        let mut row = vec![1.0];
        for level in self.action_levels.iter().skip(1) {
            row.push(if level == action { 1.0 } else { 0.0 });
        }
        for (key, levels) in &self.state_levels {
            let value = state.get(key);
            for level in levels.iter().skip(1) {
                row.push(if value == Some(level) { 1.0 } else { 0.0 });
            }
        }
        if let Some(x) = extra {
            row.push(x);
        }
        row
    }
}

fn fit_with_extra(records: &[CausalRecord], extra: Option<&[f64]>) -> Result<CausalModel> {
    if records.is_empty() {
        return Err(ArlaError::Causal("no causal records".into()));
    }
    let design = Design::from_records(records);
    let width = design.width(extra.is_some());

    let mut xtx = vec![vec![0.0f64; width]; width];
    let mut xty = vec![0.0f64; width];
    for (i, r) in records.iter().enumerate() {
        let row = design.row(&r.action, &r.state, extra.map(|e| e[i]));
        let y = r.outcome as f64;
        for a in 0..width {
            xty[a] += row[a] * y;
            for b in 0..width {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    for (a, row) in xtx.iter_mut().enumerate() {
        row[a] += RIDGE;
    }
    let coefficients = solve(xtx, xty)?;

    let observed_mean = records.iter().map(|r| r.outcome as f64).sum::<f64>() / records.len() as f64;
    let mut interventional_means = BTreeMap::new();
    for action in &design.action_levels {
        let total: f64 = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let row = design.row(action, &r.state, extra.map(|e| e[i]));
                row.iter().zip(&coefficients).map(|(x, b)| x * b).sum::<f64>()
            })
            .sum();
        interventional_means.insert(action.clone(), total / records.len() as f64);
    }

    Ok(CausalModel {
        action_levels: design.action_levels,
        state_levels: design.state_levels,
        coefficients,
        interventional_means,
        observed_mean,
        samples: records.len(),
    })
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(ArlaError::Causal("singular design matrix".into()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// Robustness scores from the three refuters, each in [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefutationReport {
    pub random_common_cause: Option<f32>,
    pub placebo_treatment: Option<f32>,
    pub data_subset: Option<f32>,
}

impl RefutationReport {
    /// Mean of the refuters that ran, 0.0 when none did
    pub fn confidence(&self) -> f32 {
        let scores: Vec<f32> = [self.random_common_cause, self.placebo_treatment, self.data_subset]
            .into_iter()
            .flatten()
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }
}

/// Re-estimates a fitted model under perturbations of its data
pub struct CausalModelValidator<'a> {
    model: &'a CausalModel,
    records: &'a [CausalRecord],
    seed: u64,
}

impl<'a> CausalModelValidator<'a> {
    pub fn new(model: &'a CausalModel, records: &'a [CausalRecord], seed: u64) -> Self {
        Self { model, records, seed }
    }

    pub fn check_robustness(&self) -> RefutationReport {
        RefutationReport {
            random_common_cause: self.random_common_cause(),
            placebo_treatment: self.placebo_treatment(),
            data_subset: self.data_subset(),
        }
    }

    /// Adding an unobserved random confounder should not move the estimate
    fn random_common_cause(&self) -> Option<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let noise: Vec<f64> = self.records.iter().map(|_| standard_normal(&mut rng) as f64).collect();
        let refit = fit_with_extra(self.records, Some(&noise)).ok()?;
        Some(stability_score(&self.model.effect_vector(), &refit.effect_vector()))
    }

    /// Shuffled actions should show (almost) no effect
    fn placebo_treatment(&self) -> Option<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(1));
        let mut actions: Vec<String> = self.records.iter().map(|r| r.action.clone()).collect();
        actions.shuffle(&mut rng);
        let placebo: Vec<CausalRecord> = self
            .records
            .iter()
            .zip(actions)
            .map(|(r, action)| CausalRecord {
                action,
                outcome: r.outcome,
                state: r.state.clone(),
            })
            .collect();
        let refit = CausalModel::fit(&placebo).ok()?;
        let original = self.model.spread();
        let ratio = refit.spread() / (original + 1e-6);
        Some((1.0 - ratio.min(1.0)) as f32)
    }

    /// A random 80% subset should give a similar estimate
    fn data_subset(&self) -> Option<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(2));
        let subset: Vec<CausalRecord> = self.records.iter().filter(|_| rng.gen::<f32>() < 0.8).cloned().collect();
        if subset.len() < 2 {
            return None;
        }
        let refit = CausalModel::fit(&subset).ok()?;
        let aligned: Vec<f64> = self
            .model
            .action_levels
            .iter()
            .map(|a| refit.interventional_means.get(a).copied().unwrap_or(refit.observed_mean) - refit.observed_mean)
            .collect();
        Some(stability_score(&self.model.effect_vector(), &aligned))
    }
}

fn stability_score(original: &[f64], refit: &[f64]) -> f32 {
    let norm = original.iter().map(|x| x * x).sum::<f64>().sqrt();
    let diff = original
        .iter()
        .zip(refit)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    (1.0 - (diff / (norm + 1e-6)).min(1.0)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(action: &str, health: &str, outcome: f32) -> CausalRecord {
        CausalRecord::from_state_node(&["STATE".to_string(), health.to_string()], action, outcome)
    }

    /// Resting happens mostly when health is low, and low health lowers reward.
    /// The naive mean under-rates resting; the adjusted estimate should not.
    fn confounded_records() -> Vec<CausalRecord> {
        let mut records = Vec::new();
        for _ in 0..18 {
            records.push(record("rest", "low_health", 1.0));
        }
        for _ in 0..2 {
            records.push(record("rest", "high_health", 5.0));
        }
        for _ in 0..2 {
            records.push(record("forage", "low_health", 0.0));
        }
        for _ in 0..18 {
            records.push(record("forage", "high_health", 4.0));
        }
        records
    }

    #[test]
    fn test_graph_accumulates_and_prunes() {
        let mut g = CausalGraph::new();
        g.add_edge("a", "b", 0.5);
        g.add_edge("a", "b", 0.25);
        g.add_edge("c", "d", 0.0105);
        assert_eq!(g.weight("a", "b"), Some(0.75));
        let pruned = g.decay_and_prune(0.5, 0.01);
        assert_eq!(pruned, 1);
        assert_eq!(g.weight("a", "b"), Some(0.375));
        assert_eq!(g.weight("c", "d"), None);
        assert_eq!(g.source_count(), 1);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_link_weight() {
        assert!((link_weight(-2.0, 0.4) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_record_from_state_node() {
        let r = record("rest", "low_health", 1.0);
        assert_eq!(r.state.get("state_1").map(String::as_str), Some("low_health"));
        assert_eq!(r.state.len(), 1);
    }

    #[test]
    fn test_backdoor_adjustment_recovers_effect() {
        let records = confounded_records();
        let model = CausalModel::fit(&records).unwrap();
        let rest = model.estimate("rest").unwrap();
        let forage = model.estimate("forage").unwrap();
        // True structure: rest = +1 over forage within each health level
        assert!((rest - forage - 1.0).abs() < 1e-3, "rest={} forage={}", rest, forage);
        assert!(model.estimate("fly").is_none());
    }

    #[test]
    fn test_empty_records_fail() {
        assert!(CausalModel::fit(&[]).is_err());
    }

    #[test]
    fn test_refuters_produce_bounded_scores() {
        let records = confounded_records();
        let model = CausalModel::fit(&records).unwrap();
        let report = CausalModelValidator::new(&model, &records, 3).check_robustness();
        let confidence = report.confidence();
        assert!((0.0..=1.0).contains(&confidence));
        assert!(report.random_common_cause.is_some());
        assert!(report.placebo_treatment.is_some());
    }

    #[test]
    fn test_node_keys() {
        assert_eq!(node_key(&["STATE", "a", "b"]), "STATE|a|b");
        assert_eq!(outcome_node("rest", true), "OUTCOME|rest|success");
    }
}
