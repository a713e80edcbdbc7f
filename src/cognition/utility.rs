//! Utility network for Q-learning
//!
//! Scores a (state, internal state, action) triple with a small MLP:
//! input -> 256 -> ReLU -> 128 -> ReLU -> 1, trained by Adam on a squared
//! Bellman error.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;

const HIDDEN_1: usize = 256;
const HIDDEN_2: usize = 128;

#[derive(Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    /// Row-major `outputs x inputs`
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, rng: &mut ChaCha8Rng) -> Self {
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let weights = (0..inputs * outputs).map(|_| rng.gen_range(-bound..bound)).collect();
        let bias = (0..outputs).map(|_| rng.gen_range(-bound..bound)).collect();
        Self {
            inputs,
            outputs,
            weights,
            bias,
        }
    }

    fn forward(&self, x: &[f32]) -> Vec<f32> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f32>() + self.bias[o]
            })
            .collect()
    }

    fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

fn relu(v: &mut [f32]) {
    for x in v {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
}

#[derive(Clone)]
struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    fn new(params: usize, lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: vec![0.0; params],
            v: vec![0.0; params],
        }
    }
}

#[derive(Clone)]
pub struct UtilityNetwork {
    state_dim: usize,
    internal_dim: usize,
    action_dim: usize,
    layers: [Dense; 3],
    optimizer: Adam,
}

impl fmt::Debug for UtilityNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilityNetwork")
            .field("state_dim", &self.state_dim)
            .field("internal_dim", &self.internal_dim)
            .field("action_dim", &self.action_dim)
            .field("steps", &self.optimizer.step)
            .finish()
    }
}

impl UtilityNetwork {
    pub fn new(state_dim: usize, internal_dim: usize, action_dim: usize, learning_rate: f32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let input = state_dim + internal_dim + action_dim;
        let layers = [
            Dense::new(input, HIDDEN_1, &mut rng),
            Dense::new(HIDDEN_1, HIDDEN_2, &mut rng),
            Dense::new(HIDDEN_2, 1, &mut rng),
        ];
        let params = layers.iter().map(Dense::param_count).sum();
        Self {
            state_dim,
            internal_dim,
            action_dim,
            layers,
            optimizer: Adam::new(params, learning_rate),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.state_dim + self.internal_dim + self.action_dim
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.state_dim, self.internal_dim, self.action_dim)
    }

    /// Concatenate, zero-padding or truncating each part to its declared size
    pub fn assemble(&self, state: &[f32], internal: &[f32], action: &[f32]) -> Vec<f32> {
        let mut input = Vec::with_capacity(self.input_dim());
        for (part, dim) in [(state, self.state_dim), (internal, self.internal_dim), (action, self.action_dim)] {
            input.extend(part.iter().take(dim));
            input.extend(std::iter::repeat(0.0).take(dim.saturating_sub(part.len())));
        }
        input
    }

    pub fn predict(&self, state: &[f32], internal: &[f32], action: &[f32]) -> f32 {
        let input = self.assemble(state, internal, action);
        self.forward(&input).2
    }

    /// Returns the post-ReLU hidden activations and the output
    fn forward(&self, input: &[f32]) -> (Vec<f32>, Vec<f32>, f32) {
        let mut h1 = self.layers[0].forward(input);
        relu(&mut h1);
        let mut h2 = self.layers[1].forward(&h1);
        relu(&mut h2);
        let out = self.layers[2].forward(&h2);
        (h1, h2, out[0])
    }

    /// One Adam step on `(q(input) - target)^2`; returns the loss before the step
    pub fn train_step(&mut self, state: &[f32], internal: &[f32], action: &[f32], target: f32) -> f32 {
        let input = self.assemble(state, internal, action);
        let (h1, h2, q) = self.forward(&input);
        let error = q - target;
        let loss = error * error;
        if !loss.is_finite() {
            tracing::warn!("Non-finite Q loss, skipping update");
            return loss;
        }

        let d_out = [2.0 * error];
        let mut grads: Vec<f32> = Vec::with_capacity(self.optimizer.m.len());

        let (g3w, g3b, d_h2) = backward(&self.layers[2], &h2, &d_out);
        let d_h2: Vec<f32> = d_h2.iter().zip(&h2).map(|(g, h)| if *h > 0.0 { *g } else { 0.0 }).collect();
        let (g2w, g2b, d_h1) = backward(&self.layers[1], &h1, &d_h2);
        let d_h1: Vec<f32> = d_h1.iter().zip(&h1).map(|(g, h)| if *h > 0.0 { *g } else { 0.0 }).collect();
        let (g1w, g1b, _) = backward(&self.layers[0], &input, &d_h1);

        for (w, b) in [(g1w, g1b), (g2w, g2b), (g3w, g3b)] {
            grads.extend(w);
            grads.extend(b);
        }
        self.apply_adam(&grads);
        loss
    }

    fn apply_adam(&mut self, grads: &[f32]) {
        let opt = &mut self.optimizer;
        opt.step += 1;
        let bias1 = 1.0 - opt.beta1.powi(opt.step);
        let bias2 = 1.0 - opt.beta2.powi(opt.step);

        let mut idx = 0;
        for layer in self.layers.iter_mut() {
            for p in layer.weights.iter_mut().chain(layer.bias.iter_mut()) {
                let g = grads[idx];
                opt.m[idx] = opt.beta1 * opt.m[idx] + (1.0 - opt.beta1) * g;
                opt.v[idx] = opt.beta2 * opt.v[idx] + (1.0 - opt.beta2) * g * g;
                let m_hat = opt.m[idx] / bias1;
                let v_hat = opt.v[idx] / bias2;
                *p -= opt.lr * m_hat / (v_hat.sqrt() + opt.eps);
                idx += 1;
            }
        }
    }

    /// True when any parameter is NaN or infinite
    pub fn has_non_finite(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.weights.iter().chain(&l.bias).any(|p| !p.is_finite()))
    }
}

/// Gradients of a dense layer: (d_weights, d_bias, d_input)
fn backward(layer: &Dense, input: &[f32], d_out: &[f32]) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let mut d_w = vec![0.0f32; layer.weights.len()];
    let mut d_in = vec![0.0f32; layer.inputs];
    for (o, g) in d_out.iter().enumerate() {
        let row = o * layer.inputs;
        for i in 0..layer.inputs {
            d_w[row + i] = g * input[i];
            d_in[i] += g * layer.weights[row + i];
        }
    }
    (d_w, d_out.to_vec(), d_in)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_pads_and_truncates() {
        let net = UtilityNetwork::new(2, 1, 3, 0.01, 0);
        let input = net.assemble(&[1.0, 2.0, 9.0], &[], &[3.0]);
        assert_eq!(input, vec![1.0, 2.0, 0.0, 3.0, 0.0, 0.0]);
        assert_eq!(net.input_dim(), 6);
    }

    #[test]
    fn test_same_seed_same_prediction() {
        let a = UtilityNetwork::new(3, 2, 2, 0.01, 5);
        let b = UtilityNetwork::new(3, 2, 2, 0.01, 5);
        let x = [0.1, 0.2, 0.3];
        assert_eq!(a.predict(&x, &[0.5, 0.5], &[1.0, 0.0]), b.predict(&x, &[0.5, 0.5], &[1.0, 0.0]));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut net = UtilityNetwork::new(3, 2, 2, 0.01, 1);
        let state = [0.5, -0.2, 0.1];
        let internal = [0.3, 0.7];
        let action = [1.0, 0.0];
        let first = net.train_step(&state, &internal, &action, 2.0);
        let mut last = first;
        for _ in 0..50 {
            last = net.train_step(&state, &internal, &action, 2.0);
        }
        assert!(last < first);
        assert!(!net.has_non_finite());
    }
}
