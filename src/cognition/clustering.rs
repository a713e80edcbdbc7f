//! Seeded k-means clustering
//!
//! k-means++ initialisation followed by Lloyd iterations. The seed fully
//! determines the result, so emotion discovery and goal invention are
//! reproducible for a given run.
//!
//! Fails fast on empty input, `k == 0` or `k > n`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::core::error::{ArlaError, Result};

#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
    pub tolerance: f32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub centroids: Vec<Vec<f32>>,
    /// Cluster index for each input row
    pub assignments: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeansResult {
    /// Row indices belonging to `cluster`
    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == cluster)
            .map(|(i, _)| i)
            .collect()
    }
}

impl KMeans {
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            max_iterations: 100,
            tolerance: 1e-4,
            seed,
        }
    }

    pub fn fit(&self, data: &[Vec<f32>]) -> Result<KMeansResult> {
        if data.is_empty() {
            return Err(ArlaError::Clustering("data must not be empty".into()));
        }
        if self.k == 0 || self.k > data.len() {
            return Err(ArlaError::Clustering(format!(
                "k ({}) must be in 1..={}",
                self.k,
                data.len()
            )));
        }
        let dim = data[0].len();
        if data.iter().any(|row| row.len() != dim) {
            return Err(ArlaError::Clustering("rows have inconsistent lengths".into()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut centroids = kmeans_plus_plus_init(data, self.k, &mut rng);
        let mut assignments = vec![0usize; data.len()];
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.max_iterations {
            iterations = iter + 1;

            // Assignment is independent per point
            assignments = data
                .par_iter()
                .map(|row| nearest_centroid(row, &centroids).unwrap_or(0))
                .collect();

            let new_centroids = compute_centroids(data, &assignments, &centroids);
            let max_movement = centroids
                .iter()
                .zip(&new_centroids)
                .map(|(old, new)| distance_squared(old, new).sqrt())
                .fold(0.0f32, f32::max);
            centroids = new_centroids;

            if max_movement < self.tolerance {
                converged = true;
                break;
            }
        }

        tracing::debug!(
            "k-means finished: k={}, n={}, iterations={}, converged={}",
            self.k,
            data.len(),
            iterations,
            converged
        );

        Ok(KMeansResult {
            centroids,
            assignments,
            iterations,
            converged,
        })
    }
}

pub fn distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (j, c) in centroids.iter().enumerate() {
        let d = distance_squared(point, c);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((j, d)),
        }
    }
    best.map(|(j, _)| j)
}

fn kmeans_plus_plus_init(data: &[Vec<f32>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..data.len())].clone());
    let mut min_distances = vec![f32::MAX; data.len()];

    while centroids.len() < k {
        let last = &centroids[centroids.len() - 1];
        for (i, row) in data.iter().enumerate() {
            min_distances[i] = min_distances[i].min(distance_squared(row, last));
        }

        let total: f32 = min_distances.iter().sum();
        let next = if total <= 0.0 || !total.is_finite() {
            // Every point already sits on a centroid; take the first unused row
            (0..data.len())
                .find(|&i| !centroids.iter().any(|c| distance_squared(c, &data[i]) < 1e-12))
                .unwrap_or(centroids.len() % data.len())
        } else {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = data.len() - 1;
            for (i, d) in min_distances.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.push(data[next].clone());
    }

    centroids
}

/// Mean of assigned rows; an empty cluster keeps its previous centroid
fn compute_centroids(data: &[Vec<f32>], assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dim = data[0].len();
    let mut sums = vec![vec![0.0f32; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (row, &cluster) in data.iter().zip(assignments) {
        counts[cluster] += 1;
        for (s, x) in sums[cluster].iter_mut().zip(row) {
            *s += x;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                sum.into_iter().map(|s| s / count as f32).collect()
            }
        })
        .collect()
}
