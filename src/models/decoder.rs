use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, RngCore};

use crate::layers::attention::{AdditiveAttention, AttentionCache, AttentionGradients, AttentionMemory};
use crate::layers::embedding::Embedding;
use crate::layers::linear::{LinearGradients, LinearLayer};
use crate::layers::lstm_cell::{LSTMCell, LSTMCellCache, LSTMCellGradients};
use crate::optimizers::Optimizer;
use crate::utils::{argmax_columns, softmax_columns};

/// Where each decoder step after the first takes its input token from
pub enum Feedback<'a> {
    /// The ground-truth decoder input
    TeacherForced,
    /// A token drawn from the previous step's output distribution
    Sampled(&'a mut dyn RngCore),
    /// The previous step's most likely token
    Greedy,
}

impl Feedback<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Feedback::TeacherForced => "teacher_forced",
            Feedback::Sampled(_) => "sampled",
            Feedback::Greedy => "greedy",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DecoderGradients {
    pub input_mix: LinearGradients,
    pub cell: LSTMCellGradients,
    pub attention: AttentionGradients,
    pub output_mix: LinearGradients,
}

impl DecoderGradients {
    pub fn tensors(&self) -> Vec<&Array2<f64>> {
        let mut tensors = self.input_mix.tensors();
        tensors.extend(self.cell.tensors());
        tensors.extend(self.attention.tensors());
        tensors.extend(self.output_mix.tensors());
        tensors
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut tensors = self.input_mix.tensors_mut();
        tensors.extend(self.cell.tensors_mut());
        tensors.extend(self.attention.tensors_mut());
        tensors.extend(self.output_mix.tensors_mut());
        tensors
    }
}

#[derive(Clone, Debug)]
pub struct DecoderStepCache {
    pub token_ids: Array1<usize>,
    pub mixed_input: Array2<f64>,
    pub cell: LSTMCellCache,
    pub attention: AttentionCache,
    pub mixed_output: Array2<f64>,
}

/// One full decoder unroll
#[derive(Clone, Debug)]
pub struct DecoderRun {
    /// `(hidden, batch)` per step, before the vocabulary projection
    pub outputs: Vec<Array2<f64>>,
    /// `(vocab, batch)` per step
    pub logits: Vec<Array2<f64>>,
    pub steps: Vec<DecoderStepCache>,
}

impl DecoderRun {
    /// The token fed into every step, `[batch, steps]`
    pub fn input_tokens(&self) -> Array2<usize> {
        let batch = self.steps.first().map_or(0, |s| s.token_ids.len());
        let mut tokens = Array2::zeros((batch, self.steps.len()));
        for (t, step) in self.steps.iter().enumerate() {
            tokens.column_mut(t).assign(&step.token_ids);
        }
        tokens
    }

    /// Argmax of every step's logits, `[batch, steps]`
    pub fn best_tokens(&self) -> Array2<usize> {
        let batch = self.logits.first().map_or(0, |l| l.ncols());
        let mut tokens = Array2::zeros((batch, self.logits.len()));
        for (t, logits) in self.logits.iter().enumerate() {
            tokens.column_mut(t).assign(&argmax_columns(logits));
        }
        tokens
    }
}

/// Result of [`AttentionDecoder::backward`]
#[derive(Clone, Debug)]
pub struct DecoderBackward {
    pub gradients: DecoderGradients,
    pub d_initial_h: Array2<f64>,
    pub d_initial_c: Array2<f64>,
    pub d_attention_states: Vec<Array2<f64>>,
}

/// LSTM decoder reading the encoder through additive attention
///
/// Each step mixes the input embedding with the previous attention context
/// back down to `emb_dim`, advances the cell, attends with the new
/// `[c; h]` state, and mixes `[h; context]` into the step output. The
/// context before the first step is zero.
#[derive(Clone, Debug)]
pub struct AttentionDecoder {
    pub input_mix: LinearLayer,
    pub cell: LSTMCell,
    pub attention: AdditiveAttention,
    pub output_mix: LinearLayer,
}

impl AttentionDecoder {
    /// `cell_rng` seeds the LSTM weights (uniform ±0.1); `rng` the remaining layers
    pub fn new<R: Rng, C: Rng>(emb_dim: usize, hidden_dim: usize, attn_size: usize, cell_rng: &mut C, rng: &mut R) -> Self {
        Self {
            input_mix: LinearLayer::new(emb_dim + attn_size, emb_dim, rng),
            cell: LSTMCell::new(emb_dim, hidden_dim, 0.1, cell_rng),
            attention: AdditiveAttention::new(attn_size, 2 * hidden_dim, rng),
            output_mix: LinearLayer::new(hidden_dim + attn_size, hidden_dim, rng),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size
    }

    /// Unroll for `dec_batch.ncols()` steps
    ///
    /// Step 0 always reads `dec_batch[:, 0]`; later steps read according to
    /// `feedback`. `projection` maps step outputs to vocabulary logits.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        embedding: &Embedding,
        projection: &LinearLayer,
        memory: &AttentionMemory,
        initial_h: &Array2<f64>,
        initial_c: &Array2<f64>,
        dec_batch: ArrayView2<usize>,
        mut feedback: Feedback<'_>,
    ) -> DecoderRun {
        let (batch, steps) = dec_batch.dim();
        let attn_size = self.attention.attn_size();

        let mut h = initial_h.clone();
        let mut c = initial_c.clone();
        let mut context = Array2::zeros((attn_size, batch));

        let mut outputs = Vec::with_capacity(steps);
        let mut all_logits: Vec<Array2<f64>> = Vec::with_capacity(steps);
        let mut caches = Vec::with_capacity(steps);

        for t in 0..steps {
            let token_ids = match (&mut feedback, all_logits.last()) {
                (Feedback::Sampled(rng), Some(prev)) => sample_columns(prev, &mut **rng),
                (Feedback::Greedy, Some(prev)) => argmax_columns(prev),
                _ => dec_batch.column(t).to_owned(),
            };

            let inp = embedding.lookup(token_ids.view());
            let mixed_input = concatenate![Axis(0), inp, context];
            let x = self.input_mix.forward(&mixed_input);

            let (hy, cy, cell_cache) = self.cell.forward_with_cache(&x, &h, &c);
            h = hy;
            c = cy;

            let query = concatenate![Axis(0), c, h];
            let (new_context, attention_cache) = self.attention.forward(memory, &query);
            context = new_context;

            let mixed_output = concatenate![Axis(0), h, context];
            let output = self.output_mix.forward(&mixed_output);
            all_logits.push(projection.forward(&output));
            outputs.push(output);

            caches.push(DecoderStepCache {
                token_ids,
                mixed_input,
                cell: cell_cache,
                attention: attention_cache,
                mixed_output,
            });
        }

        DecoderRun {
            outputs,
            logits: all_logits,
            steps: caches,
        }
    }

    /// Backpropagate output gradients through a teacher-forced run
    ///
    /// Embedding gradients for the fed tokens are added into `embedding_grad`.
    pub fn backward(
        &self,
        memory: &AttentionMemory,
        run: &DecoderRun,
        d_outputs: &[Array2<f64>],
        embedding_grad: &mut Array2<f64>,
    ) -> DecoderBackward {
        let hidden = self.hidden_size();
        let emb_dim = self.cell.input_size;
        let batch = d_outputs.first().map_or(0, |d| d.ncols());

        let mut gradients = self.zero_gradients();
        let mut dh = Array2::zeros((hidden, batch));
        let mut dc = Array2::zeros((hidden, batch));
        let mut d_context_next = Array2::zeros((self.attention.attn_size(), batch));
        let mut d_features: Vec<Array2<f64>> = memory.features.iter().map(|f| Array2::zeros(f.raw_dim())).collect();
        let mut d_states: Vec<Array2<f64>> = memory.states.iter().map(|s| Array2::zeros(s.raw_dim())).collect();

        for (step, d_output) in run.steps.iter().zip(d_outputs).rev() {
            let (output_grads, d_mixed_output) = self.output_mix.backward(&step.mixed_output, d_output);
            gradients.output_mix.accumulate(&output_grads);
            dh += &d_mixed_output.slice(s![..hidden, ..]);
            let d_context = &d_mixed_output.slice(s![hidden.., ..]) + &d_context_next;

            let attention = self.attention.backward(memory, &step.attention, &d_context);
            gradients.attention.query.accumulate(&attention.query_layer);
            gradients.attention.v += &attention.v;
            for (acc, d) in d_features.iter_mut().zip(&attention.features) {
                *acc += d;
            }
            for (acc, d) in d_states.iter_mut().zip(&attention.states) {
                *acc += d;
            }
            dc += &attention.query.slice(s![..hidden, ..]);
            dh += &attention.query.slice(s![hidden.., ..]);

            let (cell_grads, dx, dh_prev, dc_prev) = self.cell.backward(&dh, &dc, &step.cell);
            gradients.cell.accumulate(&cell_grads);

            let (input_grads, d_mixed_input) = self.input_mix.backward(&step.mixed_input, &dx);
            gradients.input_mix.accumulate(&input_grads);
            let d_inp = d_mixed_input.slice(s![..emb_dim, ..]).to_owned();
            Embedding::accumulate_gradient(&d_inp, step.token_ids.view(), embedding_grad);

            // The context fed into the first step is a constant zero
            d_context_next = d_mixed_input.slice(s![emb_dim.., ..]).to_owned();
            dh = dh_prev;
            dc = dc_prev;
        }

        let (d_w_states, d_states_through_features) = self.attention.memory_backward(memory, &d_features);
        gradients.attention.w_states += &d_w_states;
        for (acc, d) in d_states.iter_mut().zip(&d_states_through_features) {
            *acc += d;
        }

        DecoderBackward {
            gradients,
            d_initial_h: dh,
            d_initial_c: dc,
            d_attention_states: d_states,
        }
    }

    pub fn zero_gradients(&self) -> DecoderGradients {
        DecoderGradients {
            input_mix: self.input_mix.zero_gradients(),
            cell: self.cell.zero_gradients(),
            attention: self.attention.zero_gradients(),
            output_mix: self.output_mix.zero_gradients(),
        }
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &DecoderGradients, optimizer: &mut O, prefix: &str) {
        self.input_mix
            .update_parameters(&gradients.input_mix, optimizer, &format!("{}_input_mix", prefix));
        self.cell
            .update_parameters(&gradients.cell, optimizer, &format!("{}_cell", prefix));
        self.attention
            .update_parameters(&gradients.attention, optimizer, &format!("{}_attention", prefix));
        self.output_mix
            .update_parameters(&gradients.output_mix, optimizer, &format!("{}_output_mix", prefix));
    }

    pub fn num_parameters(&self) -> usize {
        self.input_mix.num_parameters()
            + self.cell.num_parameters()
            + self.attention.num_parameters()
            + self.output_mix.num_parameters()
    }
}

/// One multinomial draw per column of `(vocab, batch)` logits
fn sample_columns(logits: &Array2<f64>, rng: &mut dyn RngCore) -> Array1<usize> {
    let probs = softmax_columns(logits);
    probs
        .axis_iter(Axis(1))
        .map(|col| match WeightedIndex::<f64>::new(col.iter()) {
            Ok(dist) => dist.sample(&mut *rng),
            // Non-finite logits leave no valid distribution; fall back to the mode
            Err(_) => argmax_columns(&col.to_owned().insert_axis(Axis(1)))[0],
        })
        .collect()
}
