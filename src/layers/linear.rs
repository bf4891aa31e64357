use ndarray::{Array2, Axis};
use rand::Rng;

use crate::optimizers::Optimizer;
use crate::utils::{truncated_normal_matrix, uniform_matrix};

/// Holds gradients for linear layer parameters during backpropagation
#[derive(Clone, Debug)]
pub struct LinearGradients {
    pub weight: Array2<f64>,
    pub bias: Array2<f64>,
}

impl LinearGradients {
    pub fn accumulate(&mut self, other: &LinearGradients) {
        self.weight += &other.weight;
        self.bias += &other.bias;
    }

    pub fn tensors(&self) -> Vec<&Array2<f64>> {
        vec![&self.weight, &self.bias]
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        vec![&mut self.weight, &mut self.bias]
    }
}

/// A fully connected layer: `output = weight · input + bias`
///
/// `weight` is `(output_size, input_size)` and `bias` is `(output_size, 1)`.
/// The layer keeps no per-call state: the decoder applies the same layer at
/// every step, so callers hold on to their inputs and pass them back to
/// [`LinearLayer::backward`].
#[derive(Clone, Debug)]
pub struct LinearLayer {
    pub weight: Array2<f64>,
    pub bias: Array2<f64>,
    pub input_size: usize,
    pub output_size: usize,
}

impl LinearLayer {
    /// Xavier/Glorot uniform weights, zero bias
    pub fn new<R: Rng>(input_size: usize, output_size: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        Self {
            weight: uniform_matrix((output_size, input_size), limit, rng),
            bias: Array2::zeros((output_size, 1)),
            input_size,
            output_size,
        }
    }

    /// Truncated-normal weights and bias, as used for the vocabulary projection
    pub fn truncated_normal<R: Rng>(input_size: usize, output_size: usize, stddev: f64, rng: &mut R) -> Self {
        let weight = truncated_normal_matrix((output_size, input_size), stddev, rng);
        let bias = truncated_normal_matrix((output_size, 1), stddev, rng);
        Self::from_weights(weight, bias)
    }

    pub fn from_weights(weight: Array2<f64>, bias: Array2<f64>) -> Self {
        let (output_size, input_size) = weight.dim();
        assert_eq!(bias.shape(), &[output_size, 1], "Bias shape must be (output_size, 1)");

        Self {
            weight,
            bias,
            input_size,
            output_size,
        }
    }

    /// `input` is `(input_size, batch)`; returns `(output_size, batch)`
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        debug_assert_eq!(input.nrows(), self.input_size);
        &self.weight.dot(input) + &self.bias
    }

    /// Returns parameter gradients and the gradient w.r.t. `input`
    pub fn backward(&self, input: &Array2<f64>, grad_output: &Array2<f64>) -> (LinearGradients, Array2<f64>) {
        debug_assert_eq!(grad_output.nrows(), self.output_size);
        debug_assert_eq!(grad_output.ncols(), input.ncols());

        let gradients = LinearGradients {
            weight: grad_output.dot(&input.t()),
            bias: grad_output.sum_axis(Axis(1)).insert_axis(Axis(1)),
        };
        let input_grad = self.weight.t().dot(grad_output);

        (gradients, input_grad)
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &LinearGradients, optimizer: &mut O, prefix: &str) {
        optimizer.update(&format!("{}_weight", prefix), &mut self.weight, &gradients.weight);
        optimizer.update(&format!("{}_bias", prefix), &mut self.bias, &gradients.bias);
    }

    pub fn zero_gradients(&self) -> LinearGradients {
        LinearGradients {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array2::zeros(self.bias.raw_dim()),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_layer_creation() {
        let layer = LinearLayer::new(10, 5, &mut StdRng::seed_from_u64(0));
        assert_eq!(layer.weight.shape(), &[5, 10]);
        assert_eq!(layer.bias.shape(), &[5, 1]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_layer_forward() {
        let layer = LinearLayer::from_weights(arr2(&[[1.0, 2.0], [3.0, 4.0]]), arr2(&[[0.5], [-0.5]]));
        let output = layer.forward(&arr2(&[[1.0, 0.0], [1.0, 2.0]]));
        assert_eq!(output, arr2(&[[3.5, 4.5], [6.5, 7.5]]));
    }

    #[test]
    fn test_linear_layer_backward() {
        let layer = LinearLayer::from_weights(arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]), Array2::zeros((2, 1)));
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let grad_output = arr2(&[[1.0, 1.0], [0.0, 2.0]]);

        let (gradients, input_grad) = layer.backward(&input, &grad_output);

        assert_eq!(gradients.weight, arr2(&[[3.0, 7.0, 11.0], [4.0, 8.0, 12.0]]));
        assert_eq!(gradients.bias, arr2(&[[2.0], [2.0]]));
        assert_eq!(input_grad, arr2(&[[1.0, 9.0], [2.0, 12.0], [3.0, 15.0]]));
    }

    #[test]
    fn test_truncated_normal_projection_is_small() {
        let layer = LinearLayer::truncated_normal(8, 20, 1e-4, &mut StdRng::seed_from_u64(2));
        assert!(layer.weight.iter().all(|w| w.abs() <= 2e-4));
        assert!(layer.bias.iter().all(|b| b.abs() <= 2e-4));
    }
}
