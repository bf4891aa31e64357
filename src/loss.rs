use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::utils::softmax_columns;

/// Keeps a fully padded sequence from dividing by zero
const WEIGHT_EPSILON: f64 = 1e-12;

/// Masked cross-entropy over a decoded sequence
///
/// Each item's loss is its weighted cross-entropy averaged over its own
/// timesteps (`Σ_t w_t CE_t / Σ_t w_t`); items are not averaged together, so
/// callers get one value per batch item and take the mean themselves.
pub struct SequenceLoss;

/// Output of [`SequenceLoss::compute`]
#[derive(Clone, Debug)]
pub struct SequenceLossOutput {
    /// One averaged loss per batch item
    pub per_example: Array1<f64>,
    /// Mean of `per_example`
    pub cost: f64,
    /// d cost / d logits, one `(vocab, batch)` matrix per step
    pub d_logits: Vec<Array2<f64>>,
}

impl SequenceLoss {
    /// `logits` holds one `(vocab, batch)` matrix per step; `targets` and
    /// `weights` are `[batch, steps]`.
    pub fn compute(
        logits: &[Array2<f64>],
        targets: ArrayView2<usize>,
        weights: ArrayView2<f64>,
    ) -> SequenceLossOutput {
        let (batch, steps) = targets.dim();
        let total_weights: Array1<f64> = weights.rows().into_iter().map(|row| row.sum() + WEIGHT_EPSILON).collect();

        let mut crossent_sum = Array1::zeros(batch);
        let mut d_logits = Vec::with_capacity(steps);

        for (t, step_logits) in logits.iter().enumerate() {
            let probs = softmax_columns(step_logits);
            let mut grad = probs.clone();

            for b in 0..batch {
                let target = targets[[b, t]];
                let weight = weights[[b, t]];
                crossent_sum[b] += weight * cross_entropy(step_logits.column(b), target);

                grad[[target, b]] -= 1.0;
                let scale = weight / total_weights[b] / batch as f64;
                grad.column_mut(b).mapv_inplace(|g| g * scale);
            }

            d_logits.push(grad);
        }

        let per_example = &crossent_sum / &total_weights;
        let cost = per_example.mean().unwrap_or(0.0);

        SequenceLossOutput {
            per_example,
            cost,
            d_logits,
        }
    }
}

/// Cross-entropy of one logit column against a target class, via log-sum-exp
pub fn cross_entropy(logits: ArrayView1<f64>, target: usize) -> f64 {
    let max_val = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let log_sum = logits.iter().map(|&x| (x - max_val).exp()).sum::<f64>().ln() + max_val;
    log_sum - logits[target]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn logits() -> Vec<Array2<f64>> {
        vec![
            arr2(&[[2.0, 0.0], [0.5, 0.0], [-1.0, 0.0]]),
            arr2(&[[0.1, 1.0], [0.2, 3.0], [0.3, -2.0]]),
            arr2(&[[5.0, 0.3], [0.0, 0.2], [0.0, 0.1]]),
        ]
    }

    #[test]
    fn test_averages_across_timesteps_only() {
        let targets = arr2(&[[0, 2, 1], [1, 1, 0]]);
        let weights = arr2(&[[1.0, 1.0, 0.0], [1.0, 1.0, 1.0]]);
        let out = SequenceLoss::compute(&logits(), targets.view(), weights.view());

        let l = logits();
        let first = (cross_entropy(l[0].column(0), 0) + cross_entropy(l[1].column(0), 2)) / 2.0;
        let second = (cross_entropy(l[0].column(1), 1) + cross_entropy(l[1].column(1), 1) + cross_entropy(l[2].column(1), 0)) / 3.0;

        assert!((out.per_example[0] - first).abs() < 1e-9);
        assert!((out.per_example[1] - second).abs() < 1e-9);
        assert!((out.cost - (first + second) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_masked_steps_have_no_gradient() {
        let targets = arr2(&[[0, 2, 1], [1, 1, 0]]);
        let weights = arr2(&[[1.0, 1.0, 0.0], [1.0, 1.0, 1.0]]);
        let out = SequenceLoss::compute(&logits(), targets.view(), weights.view());
        assert!(out.d_logits[2].column(0).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_fully_padded_item_is_finite() {
        let targets = arr2(&[[0, 0, 0], [1, 1, 0]]);
        let weights = arr2(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let out = SequenceLoss::compute(&logits(), targets.view(), weights.view());
        assert_eq!(out.per_example[0], 0.0);
        assert!(out.cost.is_finite());
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let targets = arr2(&[[0, 2, 1], [1, 1, 0]]);
        let weights = arr2(&[[1.0, 0.5, 0.0], [1.0, 1.0, 1.0]]);
        let base = logits();
        let out = SequenceLoss::compute(&base, targets.view(), weights.view());

        let eps = 1e-6;
        for (t, v, b) in [(0, 0, 0), (1, 2, 0), (2, 1, 1)] {
            let mut plus = base.clone();
            plus[t][[v, b]] += eps;
            let mut minus = base.clone();
            minus[t][[v, b]] -= eps;
            let numeric = (SequenceLoss::compute(&plus, targets.view(), weights.view()).cost
                - SequenceLoss::compute(&minus, targets.view(), weights.view()).cost)
                / (2.0 * eps);
            assert!((numeric - out.d_logits[t][[v, b]]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cross_entropy_uniform() {
        let ce = cross_entropy(arr1(&[0.0, 0.0, 0.0, 0.0]).view(), 2);
        assert!((ce - 4.0_f64.ln()).abs() < 1e-12);
    }
}
