use ndarray::Array2;
use std::collections::HashMap;

/// Optimizer trait for parameter updates during training
pub trait Optimizer {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>);
    fn reset(&mut self);
}

/// Adagrad with a non-zero starting accumulator
///
/// Implements: G_t = G_{t-1} + g_t²
///             θ_t = θ_{t-1} - η * g_t / √G_t
/// with G_0 = `initial_accumulator_value` for every entry, which keeps the
/// first steps bounded without an epsilon term.
pub struct Adagrad {
    learning_rate: f64,
    initial_accumulator_value: f64,
    accumulators: HashMap<String, Array2<f64>>,
}

impl Adagrad {
    pub fn new(learning_rate: f64, initial_accumulator_value: f64) -> Self {
        Adagrad {
            learning_rate,
            initial_accumulator_value,
            accumulators: HashMap::new(),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Accumulated squared gradients for a parameter, once it has been updated
    pub fn accumulator(&self, param_id: &str) -> Option<&Array2<f64>> {
        self.accumulators.get(param_id)
    }
}

impl Optimizer for Adagrad {
    fn update(&mut self, param_id: &str, param: &mut Array2<f64>, gradient: &Array2<f64>) {
        let initial = self.initial_accumulator_value;
        let accumulator = self
            .accumulators
            .entry(param_id.to_string())
            .or_insert_with(|| Array2::from_elem(param.raw_dim(), initial));

        *accumulator += &(gradient * gradient);

        let step = self.learning_rate * gradient / &accumulator.mapv(f64::sqrt);
        *param -= &step;
    }

    fn reset(&mut self) {
        self.accumulators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_adagrad_first_step() {
        let mut optimizer = Adagrad::new(0.5, 0.1);
        let mut param = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let gradient = arr2(&[[0.3, 0.0], [-0.4, 1.0]]);

        optimizer.update("w", &mut param, &gradient);

        let expected_00 = 1.0 - 0.5 * 0.3 / (0.1_f64 + 0.09).sqrt();
        assert!((param[[0, 0]] - expected_00).abs() < 1e-12);
        assert_eq!(param[[0, 1]], 2.0);
        let expected_10 = 3.0 + 0.5 * 0.4 / (0.1_f64 + 0.16).sqrt();
        assert!((param[[1, 0]] - expected_10).abs() < 1e-12);
    }

    #[test]
    fn test_adagrad_steps_shrink() {
        let mut optimizer = Adagrad::new(0.1, 0.1);
        let mut param = arr2(&[[0.0]]);
        let gradient = arr2(&[[1.0]]);

        optimizer.update("w", &mut param, &gradient);
        let first = -param[[0, 0]];
        optimizer.update("w", &mut param, &gradient);
        let second = -param[[0, 0]] - first;

        assert!(second < first);
        assert!((optimizer.accumulator("w").unwrap()[[0, 0]] - 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_parameters_tracked_separately_and_reset() {
        let mut optimizer = Adagrad::new(0.1, 0.1);
        let mut a = arr2(&[[0.0]]);
        let mut b = arr2(&[[0.0]]);
        optimizer.update("a", &mut a, &arr2(&[[1.0]]));
        optimizer.update("b", &mut b, &arr2(&[[2.0]]));

        assert!((optimizer.accumulator("a").unwrap()[[0, 0]] - 1.1).abs() < 1e-12);
        assert!((optimizer.accumulator("b").unwrap()[[0, 0]] - 4.1).abs() < 1e-12);

        optimizer.reset();
        assert!(optimizer.accumulator("a").is_none());
    }
}
