use ndarray::Array2;

use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::utils::step_mask;

/// Reverse the first `lens[b]` steps of every batch column, leaving padding in place
///
/// Applying it twice gives back the original sequence.
pub fn reverse_within_lengths(sequence: &[Array2<f64>], lens: &[usize]) -> Vec<Array2<f64>> {
    let steps = sequence.len();
    let mut reversed: Vec<Array2<f64>> = sequence.to_vec();

    for (b, &len) in lens.iter().enumerate() {
        let len = len.min(steps);
        for t in 0..len {
            reversed[t].column_mut(b).assign(&sequence[len - 1 - t].column(b));
        }
    }

    reversed
}

/// Per-step record of a length-aware run
#[derive(Clone, Debug)]
pub struct DynamicLstmCache {
    pub cell_caches: Vec<LSTMCellCache>,
    pub masks: Vec<Array2<f64>>,
}

/// Result of running a cell over a padded sequence
#[derive(Clone, Debug)]
pub struct DynamicLstmOutput {
    /// `(hidden_size, batch)` per step; zero past each item's length
    pub outputs: Vec<Array2<f64>>,
    pub final_h: Array2<f64>,
    pub final_c: Array2<f64>,
    pub cache: DynamicLstmCache,
}

/// Gradients produced by [`DynamicLstm::backward`]
#[derive(Clone, Debug)]
pub struct DynamicLstmGradients {
    pub cell: LSTMCellGradients,
    pub inputs: Vec<Array2<f64>>,
    pub initial_h: Array2<f64>,
    pub initial_c: Array2<f64>,
}

/// Runs an [`LSTMCell`] over sequences of differing lengths
///
/// Past an item's length the state is carried through unchanged and the
/// emitted output is zero, so the final state is the state after the last
/// valid step.
pub struct DynamicLstm;

impl DynamicLstm {
    pub fn run(
        cell: &LSTMCell,
        inputs: &[Array2<f64>],
        lens: &[usize],
        h0: &Array2<f64>,
        c0: &Array2<f64>,
    ) -> DynamicLstmOutput {
        let mut h = h0.clone();
        let mut c = c0.clone();
        let mut outputs = Vec::with_capacity(inputs.len());
        let mut cell_caches = Vec::with_capacity(inputs.len());
        let mut masks = Vec::with_capacity(inputs.len());

        for (t, input) in inputs.iter().enumerate() {
            let mask = step_mask(lens, t);
            let keep = mask.mapv(|m| 1.0 - m);

            let (hy, cy, cache) = cell.forward_with_cache(input, &h, &c);

            outputs.push(&hy * &mask);
            h = &hy * &mask + &h * &keep;
            c = &cy * &mask + &c * &keep;

            cell_caches.push(cache);
            masks.push(mask);
        }

        DynamicLstmOutput {
            outputs,
            final_h: h,
            final_c: c,
            cache: DynamicLstmCache { cell_caches, masks },
        }
    }

    /// Backpropagate through a run
    ///
    /// `d_outputs` may be `None` when only the final state feeds the loss.
    pub fn backward(
        cell: &LSTMCell,
        cache: &DynamicLstmCache,
        d_outputs: Option<&[Array2<f64>]>,
        d_final_h: &Array2<f64>,
        d_final_c: &Array2<f64>,
    ) -> DynamicLstmGradients {
        let steps = cache.cell_caches.len();
        let mut gradients = cell.zero_gradients();
        let mut d_inputs = vec![Array2::zeros((cell.input_size, d_final_h.ncols())); steps];
        let mut dh = d_final_h.clone();
        let mut dc = d_final_c.clone();

        for t in (0..steps).rev() {
            let mask = &cache.masks[t];
            let keep = mask.mapv(|m| 1.0 - m);

            let mut dh_step = dh.clone();
            if let Some(d_out) = d_outputs {
                dh_step += &d_out[t];
            }

            let dhy = &dh_step * mask;
            let dcy = &dc * mask;
            let (step_gradients, dx, dhx, dcx) = cell.backward(&dhy, &dcy, &cache.cell_caches[t]);

            gradients.accumulate(&step_gradients);
            d_inputs[t] = dx;
            dh = dhx + &dh * &keep;
            dc = dcx + &dc * &keep;
        }

        DynamicLstmGradients {
            cell: gradients,
            inputs: d_inputs,
            initial_h: dh,
            initial_c: dc,
        }
    }
}

/// Cache for a bidirectional run
#[derive(Clone, Debug)]
pub struct BidirectionalCache {
    pub forward: DynamicLstmCache,
    pub backward: DynamicLstmCache,
    pub lens: Vec<usize>,
}

/// Outputs of a bidirectional run; both directions start from zero state
#[derive(Clone, Debug)]
pub struct BidirectionalOutput {
    pub forward_outputs: Vec<Array2<f64>>,
    /// Already re-reversed into input order
    pub backward_outputs: Vec<Array2<f64>>,
    pub forward_final: (Array2<f64>, Array2<f64>),
    pub backward_final: (Array2<f64>, Array2<f64>),
    pub cache: BidirectionalCache,
}

/// Gradients for both directions plus the shared input sequence
#[derive(Clone, Debug)]
pub struct BidirectionalGradients {
    pub forward_cell: LSTMCellGradients,
    pub backward_cell: LSTMCellGradients,
    pub inputs: Vec<Array2<f64>>,
}

/// Bidirectional LSTM honouring per-item lengths
///
/// The backward cell reads each item's valid steps last-to-first.
#[derive(Clone, Debug)]
pub struct BidirectionalLstm {
    pub forward_cell: LSTMCell,
    pub backward_cell: LSTMCell,
}

impl BidirectionalLstm {
    pub fn new(forward_cell: LSTMCell, backward_cell: LSTMCell) -> Self {
        BidirectionalLstm {
            forward_cell,
            backward_cell,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.forward_cell.hidden_size
    }

    pub fn run(&self, sequence: &[Array2<f64>], lens: &[usize]) -> BidirectionalOutput {
        let batch = lens.len();
        let (h0, c0) = self.forward_cell.zero_state(batch);

        let forward = DynamicLstm::run(&self.forward_cell, sequence, lens, &h0, &c0);

        let reversed = reverse_within_lengths(sequence, lens);
        let (bh0, bc0) = self.backward_cell.zero_state(batch);
        let backward = DynamicLstm::run(&self.backward_cell, &reversed, lens, &bh0, &bc0);

        BidirectionalOutput {
            forward_outputs: forward.outputs,
            backward_outputs: reverse_within_lengths(&backward.outputs, lens),
            forward_final: (forward.final_h, forward.final_c),
            backward_final: (backward.final_h, backward.final_c),
            cache: BidirectionalCache {
                forward: forward.cache,
                backward: backward.cache,
                lens: lens.to_vec(),
            },
        }
    }

    /// Backpropagate gradients arriving at the final hidden states of both directions
    pub fn backward_from_final(
        &self,
        cache: &BidirectionalCache,
        d_forward_h: &Array2<f64>,
        d_backward_h: &Array2<f64>,
    ) -> BidirectionalGradients {
        let zero_c = Array2::zeros(d_forward_h.raw_dim());

        let forward = DynamicLstm::backward(&self.forward_cell, &cache.forward, None, d_forward_h, &zero_c);
        let backward = DynamicLstm::backward(&self.backward_cell, &cache.backward, None, d_backward_h, &zero_c);

        let backward_inputs = reverse_within_lengths(&backward.inputs, &cache.lens);
        let inputs = forward
            .inputs
            .into_iter()
            .zip(backward_inputs)
            .map(|(f, b)| f + b)
            .collect();

        BidirectionalGradients {
            forward_cell: forward.cell,
            backward_cell: backward.cell,
            inputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sequence() -> Vec<Array2<f64>> {
        vec![
            arr2(&[[1.0, 10.0, 100.0]]),
            arr2(&[[2.0, 20.0, 200.0]]),
            arr2(&[[3.0, 30.0, 300.0]]),
        ]
    }

    #[test]
    fn test_reverse_within_lengths() {
        let reversed = reverse_within_lengths(&sequence(), &[3, 2, 0]);
        assert_eq!(reversed[0], arr2(&[[3.0, 20.0, 100.0]]));
        assert_eq!(reversed[1], arr2(&[[2.0, 10.0, 200.0]]));
        assert_eq!(reversed[2], arr2(&[[1.0, 30.0, 300.0]]));

        let twice = reverse_within_lengths(&reversed, &[3, 2, 0]);
        assert_eq!(twice, sequence());
    }

    #[test]
    fn test_state_carried_past_length() {
        let cell = LSTMCell::new(1, 2, 0.3, &mut StdRng::seed_from_u64(1));
        let inputs = vec![arr2(&[[0.5, 0.5]]), arr2(&[[-1.0, -1.0]])];
        let (h0, c0) = cell.zero_state(2);

        let run = DynamicLstm::run(&cell, &inputs, &[2, 1], &h0, &c0);

        // Second item stops after the first step
        assert!(run.outputs[1].column(1).iter().all(|&v| v == 0.0));
        assert_eq!(run.final_h.column(1), run.outputs[0].column(1));

        let single = DynamicLstm::run(&cell, &inputs[..1], &[1, 1], &h0, &c0);
        assert_eq!(single.final_c.column(1), run.final_c.column(1));
    }

    #[test]
    fn test_zero_length_keeps_initial_state() {
        let cell = LSTMCell::new(1, 2, 0.3, &mut StdRng::seed_from_u64(1));
        let h0 = arr2(&[[0.4], [-0.4]]);
        let c0 = arr2(&[[0.1], [0.2]]);
        let run = DynamicLstm::run(&cell, &[arr2(&[[1.0]])], &[0], &h0, &c0);
        assert_eq!(run.final_h, h0);
        assert_eq!(run.final_c, c0);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let cell = LSTMCell::new(2, 3, 0.5, &mut StdRng::seed_from_u64(9));
        let inputs = vec![
            arr2(&[[0.2, -0.5], [0.4, 0.3]]),
            arr2(&[[-0.1, 0.6], [0.9, -0.2]]),
            arr2(&[[0.3, 0.1], [-0.7, 0.8]]),
        ];
        let lens = [3, 2];
        let h0 = arr2(&[[0.1, 0.0], [0.0, 0.2], [-0.1, 0.1]]);
        let c0 = Array2::zeros((3, 2));

        // L = sum over steps of sum(outputs) + 2 * sum(final_h) + sum(final_c)
        let loss = |cell: &LSTMCell, inputs: &[Array2<f64>], h0: &Array2<f64>| {
            let run = DynamicLstm::run(cell, inputs, &lens, h0, &c0);
            run.outputs.iter().map(|o| o.sum()).sum::<f64>() + 2.0 * run.final_h.sum() + run.final_c.sum()
        };

        let run = DynamicLstm::run(&cell, &inputs, &lens, &h0, &c0);
        let d_outputs = vec![Array2::ones((3, 2)); 3];
        let grads = DynamicLstm::backward(
            &cell,
            &run.cache,
            Some(&d_outputs),
            &Array2::from_elem((3, 2), 2.0),
            &Array2::ones((3, 2)),
        );

        let eps = 1e-6;
        for (r, c) in [(1, 0), (7, 2), (10, 1)] {
            let mut plus = cell.clone();
            plus.w_hh[[r, c]] += eps;
            let mut minus = cell.clone();
            minus.w_hh[[r, c]] -= eps;
            let numeric = (loss(&plus, &inputs, &h0) - loss(&minus, &inputs, &h0)) / (2.0 * eps);
            assert!((numeric - grads.cell.w_hh[[r, c]]).abs() < 1e-6);
        }

        let mut x_plus = inputs.clone();
        x_plus[1][[0, 1]] += eps;
        let mut x_minus = inputs.clone();
        x_minus[1][[0, 1]] -= eps;
        let numeric = (loss(&cell, &x_plus, &h0) - loss(&cell, &x_minus, &h0)) / (2.0 * eps);
        assert!((numeric - grads.inputs[1][[0, 1]]).abs() < 1e-6);

        // Padded step of the second item has no influence
        assert!(grads.inputs[2].column(1).iter().all(|&v| v.abs() < 1e-12));

        let mut h_plus = h0.clone();
        h_plus[[2, 1]] += eps;
        let mut h_minus = h0.clone();
        h_minus[[2, 1]] -= eps;
        let numeric = (loss(&cell, &inputs, &h_plus) - loss(&cell, &inputs, &h_minus)) / (2.0 * eps);
        assert!((numeric - grads.initial_h[[2, 1]]).abs() < 1e-6);
    }

    #[test]
    fn test_bidirectional_backward_reads_reversed_sequence() {
        let mut rng = StdRng::seed_from_u64(4);
        let bilstm = BidirectionalLstm::new(
            LSTMCell::new(1, 2, 0.5, &mut rng),
            LSTMCell::new(1, 2, 0.5, &mut rng),
        );
        let seq = vec![arr2(&[[0.3, 0.9]]), arr2(&[[-0.6, 0.0]]), arr2(&[[0.8, 0.0]])];
        let out = bilstm.run(&seq, &[3, 1]);

        // For a length-one item the backward final state equals one step from zero
        let (h0, c0) = bilstm.backward_cell.zero_state(1);
        let (h, _) = bilstm.backward_cell.forward(&arr2(&[[0.9]]), &h0, &c0);
        for i in 0..2 {
            assert!((out.backward_final.0[[i, 1]] - h[[i, 0]]).abs() < 1e-12);
        }

        // Backward outputs are aligned with input positions
        assert_eq!(out.backward_outputs[0].column(0), out.backward_final.0.column(0));
    }

    #[test]
    fn test_bidirectional_input_gradients() {
        let mut rng = StdRng::seed_from_u64(5);
        let bilstm = BidirectionalLstm::new(
            LSTMCell::new(2, 2, 0.5, &mut rng),
            LSTMCell::new(2, 2, 0.5, &mut rng),
        );
        let seq = vec![
            arr2(&[[0.3, 0.9], [0.1, -0.2]]),
            arr2(&[[-0.6, 0.4], [0.5, 0.2]]),
        ];
        let lens = [2, 1];

        let loss = |seq: &[Array2<f64>]| {
            let out = bilstm.run(seq, &lens);
            out.forward_final.0.sum() + 3.0 * out.backward_final.0.sum()
        };

        let out = bilstm.run(&seq, &lens);
        let grads = bilstm.backward_from_final(
            &out.cache,
            &Array2::ones((2, 2)),
            &Array2::from_elem((2, 2), 3.0),
        );

        let eps = 1e-6;
        for (t, r, c) in [(0, 0, 0), (1, 1, 0), (0, 1, 1)] {
            let mut plus = seq.clone();
            plus[t][[r, c]] += eps;
            let mut minus = seq.clone();
            minus[t][[r, c]] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - grads.inputs[t][[r, c]]).abs() < 1e-6, "input[{}][{},{}]", t, r, c);
        }
    }
}
