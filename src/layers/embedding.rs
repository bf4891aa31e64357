use ndarray::{Array2, ArrayView1};
use rand::Rng;

use crate::optimizers::Optimizer;
use crate::utils::truncated_normal_matrix;

/// Token embedding shared by the encoder and the decoder
#[derive(Clone, Debug)]
pub struct Embedding {
    pub weight: Array2<f64>, // (vocab_size, emb_dim)
}

impl Embedding {
    pub fn new<R: Rng>(vocab_size: usize, emb_dim: usize, stddev: f64, rng: &mut R) -> Self {
        Self {
            weight: truncated_normal_matrix((vocab_size, emb_dim), stddev, rng),
        }
    }

    pub fn from_weights(weight: Array2<f64>) -> Self {
        Self { weight }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn emb_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Embed one token per batch column; returns `(emb_dim, ids.len())`
    pub fn lookup(&self, ids: ArrayView1<usize>) -> Array2<f64> {
        let mut output = Array2::zeros((self.emb_dim(), ids.len()));
        for (col, &id) in ids.iter().enumerate() {
            output.column_mut(col).assign(&self.weight.row(id));
        }
        output
    }

    /// Scatter-add column gradients `(emb_dim, ids.len())` into `weight_grad` rows
    pub fn accumulate_gradient(grad_output: &Array2<f64>, ids: ArrayView1<usize>, weight_grad: &mut Array2<f64>) {
        for (col, &id) in ids.iter().enumerate() {
            let mut row = weight_grad.row_mut(id);
            row += &grad_output.column(col);
        }
    }

    pub fn zero_gradients(&self) -> Array2<f64> {
        Array2::zeros(self.weight.raw_dim())
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradient: &Array2<f64>, optimizer: &mut O, prefix: &str) {
        optimizer.update(&format!("{}_weight", prefix), &mut self.weight, gradient);
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len()
    }
}
