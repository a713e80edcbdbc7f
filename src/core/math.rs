//! Numerically safe vector helpers shared by the cognitive models

use rand::Rng;

const EPSILON: f32 = 1e-8;

pub fn safe_divide(numerator: f32, denominator: f32) -> f32 {
    if denominator.abs() < EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity, 0.0 when either vector is (near) zero or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na < EPSILON || nb < EPSILON {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

/// Unit-length copy of `v`; zero vectors are returned unchanged
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let n = l2_norm(v);
    if n < EPSILON {
        v.to_vec()
    } else {
        v.iter().map(|x| x / n).collect()
    }
}

/// Element-wise mean; `None` for an empty slice
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut sum = vec![0.0f32; first.len()];
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
    }
    let n = vectors.len() as f32;
    Some(sum.into_iter().map(|s| s / n).collect())
}

pub fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

/// Standard normal sample via Box-Muller
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1: f32 = rng.gen::<f32>().max(f32::EPSILON);
    let u2: f32 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, std: f32) -> f32 {
    if std <= 0.0 {
        0.0
    } else {
        standard_normal(rng) * std
    }
}

/// Clamp that maps NaN to `lo`
pub fn clamp_finite(value: f32, lo: f32, hi: f32) -> f32 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}
