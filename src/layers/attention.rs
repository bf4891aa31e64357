//! Additive (Bahdanau-style) attention over a fixed set of encoder states.
//!
//! score_j = vᵀ tanh(W_s s_j + W_q q + b_q), a = softmax_j(score), context = Σ_j a_j s_j
//!
//! `W_s s_j` does not depend on the query, so it is computed once per encoded
//! batch ([`AttentionMemory`]) and reused at every decoder step. Padded
//! encoder positions are not masked.

use ndarray::{Array2, Axis};
use rand::Rng;

use crate::layers::linear::{LinearGradients, LinearLayer};
use crate::optimizers::Optimizer;
use crate::utils::{softmax_columns, uniform_matrix};

/// Gradients for the attention parameters
#[derive(Clone, Debug)]
pub struct AttentionGradients {
    pub w_states: Array2<f64>,
    pub query: LinearGradients,
    pub v: Array2<f64>,
}

impl AttentionGradients {
    pub fn accumulate(&mut self, other: &AttentionGradients) {
        self.w_states += &other.w_states;
        self.query.accumulate(&other.query);
        self.v += &other.v;
    }

    pub fn tensors(&self) -> Vec<&Array2<f64>> {
        let mut tensors = vec![&self.w_states, &self.v];
        tensors.extend(self.query.tensors());
        tensors
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut tensors = vec![&mut self.w_states, &mut self.v];
        tensors.extend(self.query.tensors_mut());
        tensors
    }
}

/// Encoder states plus their query-independent projections
#[derive(Clone, Debug)]
pub struct AttentionMemory {
    /// `(attn_size, batch)` per attended position
    pub states: Vec<Array2<f64>>,
    pub features: Vec<Array2<f64>>,
}

/// Per-step values needed by [`AdditiveAttention::backward`]
#[derive(Clone, Debug)]
pub struct AttentionCache {
    pub query: Array2<f64>,
    pub activations: Vec<Array2<f64>>,
    /// `(positions, batch)` attention distribution
    pub weights: Array2<f64>,
}

/// Result of backpropagating one attention read
#[derive(Clone, Debug)]
pub struct AttentionStepGradients {
    pub query_layer: LinearGradients,
    pub v: Array2<f64>,
    pub query: Array2<f64>,
    pub features: Vec<Array2<f64>>,
    pub states: Vec<Array2<f64>>,
}

#[derive(Clone, Debug)]
pub struct AdditiveAttention {
    pub w_states: Array2<f64>, // (attn_size, attn_size), no bias
    pub query: LinearLayer,    // query_size -> attn_size
    pub v: Array2<f64>,        // (attn_size, 1)
}

impl AdditiveAttention {
    pub fn new<R: Rng>(attn_size: usize, query_size: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (2 * attn_size) as f64).sqrt();
        let w_states = uniform_matrix((attn_size, attn_size), limit, rng);
        let query = LinearLayer::new(query_size, attn_size, rng);
        let v_limit = (6.0 / (2 * attn_size) as f64).sqrt();
        let v = uniform_matrix((attn_size, 1), v_limit, rng);

        Self { w_states, query, v }
    }

    pub fn attn_size(&self) -> usize {
        self.w_states.nrows()
    }

    pub fn memory(&self, states: &[Array2<f64>]) -> AttentionMemory {
        AttentionMemory {
            states: states.to_vec(),
            features: states.iter().map(|s| self.w_states.dot(s)).collect(),
        }
    }

    /// Read from `memory` with `query` `(query_size, batch)`; returns the `(attn_size, batch)` context
    pub fn forward(&self, memory: &AttentionMemory, query: &Array2<f64>) -> (Array2<f64>, AttentionCache) {
        let projected = self.query.forward(query);
        let positions = memory.states.len();
        let batch = query.ncols();

        let mut activations = Vec::with_capacity(positions);
        let mut scores = Array2::zeros((positions, batch));
        for (j, features) in memory.features.iter().enumerate() {
            let activation = (features + &projected).mapv(f64::tanh);
            scores.row_mut(j).assign(&self.v.t().dot(&activation).row(0));
            activations.push(activation);
        }

        let weights = softmax_columns(&scores);
        let mut context = Array2::zeros((self.attn_size(), batch));
        for (j, state) in memory.states.iter().enumerate() {
            let a_j = weights.row(j).insert_axis(Axis(0));
            context += &(state * &a_j);
        }

        let cache = AttentionCache {
            query: query.clone(),
            activations,
            weights,
        };
        (context, cache)
    }

    /// Backpropagate a context gradient through one read
    ///
    /// Gradients w.r.t. `features` are returned separately so callers can sum
    /// them over all reads before calling [`AdditiveAttention::memory_backward`].
    pub fn backward(
        &self,
        memory: &AttentionMemory,
        cache: &AttentionCache,
        d_context: &Array2<f64>,
    ) -> AttentionStepGradients {
        let positions = memory.states.len();
        let batch = d_context.ncols();
        let weights = &cache.weights;

        let mut d_weights = Array2::zeros((positions, batch));
        let mut d_states = Vec::with_capacity(positions);
        for (j, state) in memory.states.iter().enumerate() {
            d_weights.row_mut(j).assign(&(d_context * state).sum_axis(Axis(0)));
            let a_j = weights.row(j).insert_axis(Axis(0));
            d_states.push(d_context * &a_j);
        }

        // Softmax backward, column by column: de = a ⊙ (da - Σ_k a_k da_k)
        let expected = (weights * &d_weights).sum_axis(Axis(0)).insert_axis(Axis(0));
        let d_scores = weights * &(&d_weights - &expected);

        let mut d_v = Array2::zeros(self.v.raw_dim());
        let mut d_projected = Array2::zeros((self.attn_size(), batch));
        let mut d_features = Vec::with_capacity(positions);
        for (j, activation) in cache.activations.iter().enumerate() {
            let de_j = d_scores.row(j).insert_axis(Axis(0));
            d_v += &activation.dot(&de_j.t());
            let d_pre = self.v.dot(&de_j) * &activation.mapv(|x| 1.0 - x * x);
            d_projected += &d_pre;
            d_features.push(d_pre);
        }

        let (query_layer, d_query) = self.query.backward(&cache.query, &d_projected);

        AttentionStepGradients {
            query_layer,
            v: d_v,
            query: d_query,
            features: d_features,
            states: d_states,
        }
    }

    /// Push summed feature gradients through `W_s`; returns `(dW_s, d_states)`
    pub fn memory_backward(&self, memory: &AttentionMemory, d_features: &[Array2<f64>]) -> (Array2<f64>, Vec<Array2<f64>>) {
        let mut d_w = Array2::zeros(self.w_states.raw_dim());
        let mut d_states = Vec::with_capacity(d_features.len());
        for (state, d_feature) in memory.states.iter().zip(d_features) {
            d_w += &d_feature.dot(&state.t());
            d_states.push(self.w_states.t().dot(d_feature));
        }
        (d_w, d_states)
    }

    pub fn zero_gradients(&self) -> AttentionGradients {
        AttentionGradients {
            w_states: Array2::zeros(self.w_states.raw_dim()),
            query: self.query.zero_gradients(),
            v: Array2::zeros(self.v.raw_dim()),
        }
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &AttentionGradients, optimizer: &mut O, prefix: &str) {
        optimizer.update(&format!("{}_w_states", prefix), &mut self.w_states, &gradients.w_states);
        optimizer.update(&format!("{}_v", prefix), &mut self.v, &gradients.v);
        self.query
            .update_parameters(&gradients.query, optimizer, &format!("{}_query", prefix));
    }

    pub fn num_parameters(&self) -> usize {
        self.w_states.len() + self.v.len() + self.query.num_parameters()
    }
}
