use std::time::Instant;

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::GeneratorConfig;
use crate::error::{GeneratorError, Result};
use crate::layers::attention::AttentionMemory;
use crate::layers::embedding::Embedding;
use crate::layers::linear::LinearLayer;
use crate::layers::lstm_cell::LSTMCell;
use crate::loss::{SequenceLoss, SequenceLossOutput};
use crate::models::decoder::{AttentionDecoder, DecoderRun, Feedback};
use crate::models::encoder::{EncoderOutput, HierarchicalEncoder};
use crate::optimizers::Adagrad;
use crate::training::{GeneratorGradients, PretrainOutput};

/// Hierarchical encoder-decoder text generator
///
/// Owns every trainable tensor plus the Adagrad state and the step counter.
/// The three decoding modes share one set of parameters:
///
/// * [`Generator::run_pre_train_step`] decodes teacher-forced and applies one
///   clipped Adagrad update;
/// * [`Generator::sample_generator`] feeds back tokens sampled from the
///   previous step's distribution;
/// * [`Generator::max_generator`] feeds back the previous step's argmax.
pub struct Generator {
    pub(crate) config: GeneratorConfig,
    pub(crate) embedding: Embedding,
    pub(crate) encoder: HierarchicalEncoder,
    pub(crate) decoder: AttentionDecoder,
    pub(crate) output_projection: LinearLayer,
    optimizer: Adagrad,
    global_step: u64,
    rng: StdRng,
}

/// Forward state of one encode + decode pass
struct Unrolled {
    encoded: EncoderOutput,
    memory: AttentionMemory,
    run: DecoderRun,
}

impl Generator {
    /// Validate `config` and initialise all parameters from its seeds
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut encoder_rng = StdRng::seed_from_u64(config.encoder_seed);
        let mut decoder_rng = StdRng::seed_from_u64(config.decoder_seed);

        let embedding = Embedding::new(config.vocab_size, config.emb_dim, config.trunc_norm_init_std, &mut rng);
        let encoder = HierarchicalEncoder::new(config.emb_dim, config.hidden_dim, config.rand_unif_init_mag, &mut encoder_rng);
        let decoder = AttentionDecoder::new(
            config.emb_dim,
            config.hidden_dim,
            config.hidden_dim,
            &mut decoder_rng,
            &mut rng,
        );
        let output_projection =
            LinearLayer::truncated_normal(config.hidden_dim, config.vocab_size, config.trunc_norm_init_std, &mut rng);

        let generator = Self::assemble(config, embedding, encoder, decoder, output_projection, 0, rng);
        info!(
            parameters = generator.num_parameters(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built generator"
        );
        Ok(generator)
    }

    /// Rebuild a generator from stored parameters; optimizer state starts fresh
    pub(crate) fn from_parts(
        config: GeneratorConfig,
        embedding: Embedding,
        encoder: HierarchicalEncoder,
        decoder: AttentionDecoder,
        output_projection: LinearLayer,
        global_step: u64,
    ) -> Result<Self> {
        config.validate()?;
        check_dims("embedding", &[embedding.vocab_size(), embedding.emb_dim()], &[config.vocab_size, config.emb_dim])?;
        let (emb, hidden) = (config.emb_dim, config.hidden_dim);
        let cell_dims = |cell: &LSTMCell| [cell.input_size, cell.hidden_size];
        let linear_dims = |layer: &LinearLayer| [layer.input_size, layer.output_size];

        check_dims("sentence_forward", &cell_dims(&encoder.sentence.forward_cell), &[emb, hidden])?;
        check_dims("sentence_backward", &cell_dims(&encoder.sentence.backward_cell), &[emb, hidden])?;
        check_dims("document", &cell_dims(&encoder.document), &[2 * hidden, hidden])?;

        check_dims("decoder_input_mix", &linear_dims(&decoder.input_mix), &[emb + hidden, emb])?;
        check_dims("decoder_cell", &cell_dims(&decoder.cell), &[emb, hidden])?;
        let attention = &decoder.attention;
        check_dims(
            "decoder_attention",
            &[attention.attn_size(), attention.v.nrows(), attention.query.input_size, attention.query.output_size],
            &[hidden, hidden, 2 * hidden, hidden],
        )?;
        check_dims("decoder_output_mix", &linear_dims(&decoder.output_mix), &[2 * hidden, hidden])?;
        check_dims("output_projection", &linear_dims(&output_projection), &[hidden, config.vocab_size])?;

        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self::assemble(config, embedding, encoder, decoder, output_projection, global_step, rng))
    }

    fn assemble(
        config: GeneratorConfig,
        embedding: Embedding,
        encoder: HierarchicalEncoder,
        decoder: AttentionDecoder,
        output_projection: LinearLayer,
        global_step: u64,
        rng: StdRng,
    ) -> Self {
        let optimizer = Adagrad::new(config.lr, config.adagrad_init_acc);
        Self {
            config,
            embedding,
            encoder,
            decoder,
            output_projection,
            optimizer,
            global_step,
            rng,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Number of pretraining updates applied so far
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn num_parameters(&self) -> usize {
        self.embedding.num_parameters()
            + self.encoder.num_parameters()
            + self.decoder.num_parameters()
            + self.output_projection.num_parameters()
    }

    /// One teacher-forced step: loss, backward pass, global-norm clipping and an Adagrad update
    pub fn run_pre_train_step(&mut self, batch: &Batch) -> Result<PretrainOutput> {
        let (loss, mut gradients) = self.compute_gradients(batch)?;
        let global_norm = gradients.clip_by_global_norm(self.config.max_grad_norm);
        self.apply_gradients(&gradients);
        self.global_step += 1;

        debug!(global_norm, step = self.global_step, "applied gradients");
        info!(step = self.global_step, loss = loss.cost, "pretrain step");

        Ok(PretrainOutput {
            loss: loss.cost,
            global_step: self.global_step,
            per_example_loss: loss.per_example,
            global_norm,
        })
    }

    /// Teacher-forced loss and unclipped gradients without touching the parameters
    pub fn compute_gradients(&self, batch: &Batch) -> Result<(SequenceLossOutput, GeneratorGradients)> {
        batch.validate(&self.config)?;
        let unrolled = self.unroll(batch, Feedback::TeacherForced);
        let loss = SequenceLoss::compute(&unrolled.run.logits, batch.target_batch.view(), batch.dec_padding_mask.view());

        let mut embedding_grad = self.embedding.zero_gradients();
        let mut output_projection = self.output_projection.zero_gradients();
        let mut d_outputs = Vec::with_capacity(unrolled.run.outputs.len());
        for (output, d_logits) in unrolled.run.outputs.iter().zip(&loss.d_logits) {
            let (grads, d_output) = self.output_projection.backward(output, d_logits);
            output_projection.accumulate(&grads);
            d_outputs.push(d_output);
        }

        let decoder = self
            .decoder
            .backward(&unrolled.memory, &unrolled.run, &d_outputs, &mut embedding_grad);
        let encoder = self.encoder.backward(
            &unrolled.encoded.cache,
            &decoder.d_attention_states,
            &decoder.d_initial_h,
            &decoder.d_initial_c,
            &mut embedding_grad,
        );

        let gradients = GeneratorGradients {
            embedding: embedding_grad,
            encoder,
            decoder: decoder.gradients,
            output_projection,
        };
        Ok((loss, gradients))
    }

    /// Teacher-forced loss on `batch` without an update
    pub fn eval_loss(&self, batch: &Batch) -> Result<f64> {
        batch.validate(&self.config)?;
        let unrolled = self.unroll(batch, Feedback::TeacherForced);
        let loss = SequenceLoss::compute(&unrolled.run.logits, batch.target_batch.view(), batch.dec_padding_mask.view());
        Ok(loss.cost)
    }

    /// Teacher-forced vocabulary logits, `[batch, max_dec_steps, vocab_size]`
    pub fn pretrain_logits(&self, batch: &Batch) -> Result<Array3<f64>> {
        batch.validate(&self.config)?;
        let run = self.unroll(batch, Feedback::TeacherForced).run;
        let shape = (self.config.batch_size, self.config.max_dec_steps, self.config.vocab_size);
        Ok(Array3::from_shape_fn(shape, |(b, t, v)| run.logits[t][[v, b]]))
    }

    /// Decode feeding back sampled tokens; returns `[batch, max_dec_steps]` ids
    ///
    /// The returned ids are the argmax of each step's logits, not the sampled
    /// tokens that were fed back.
    pub fn sample_generator(&mut self, batch: &Batch) -> Result<Array2<usize>> {
        batch.validate(&self.config)?;
        let run = unroll(
            &self.embedding,
            &self.encoder,
            &self.decoder,
            &self.output_projection,
            batch,
            Feedback::Sampled(&mut self.rng),
        )
        .run;
        Ok(run.best_tokens())
    }

    /// Decode feeding back the previous step's argmax; returns `[batch, max_dec_steps]` ids
    pub fn max_generator(&self, batch: &Batch) -> Result<Array2<usize>> {
        batch.validate(&self.config)?;
        Ok(self.unroll(batch, Feedback::Greedy).run.best_tokens())
    }

    fn unroll(&self, batch: &Batch, feedback: Feedback<'_>) -> Unrolled {
        unroll(
            &self.embedding,
            &self.encoder,
            &self.decoder,
            &self.output_projection,
            batch,
            feedback,
        )
    }

    fn apply_gradients(&mut self, gradients: &GeneratorGradients) {
        self.embedding
            .update_parameters(&gradients.embedding, &mut self.optimizer, "embedding");
        self.encoder
            .update_parameters(&gradients.encoder, &mut self.optimizer, "encoder");
        self.decoder
            .update_parameters(&gradients.decoder, &mut self.optimizer, "decoder");
        self.output_projection
            .update_parameters(&gradients.output_projection, &mut self.optimizer, "output_projection");
    }
}

fn unroll(
    embedding: &Embedding,
    encoder: &HierarchicalEncoder,
    decoder: &AttentionDecoder,
    projection: &LinearLayer,
    batch: &Batch,
    feedback: Feedback<'_>,
) -> Unrolled {
    let encoded = encoder.forward(embedding, batch);
    let memory = decoder.attention.memory(&encoded.attention_states);
    let run = decoder.run(
        embedding,
        projection,
        &memory,
        &encoded.final_h,
        &encoded.final_c,
        batch.dec_batch.view(),
        feedback,
    );
    Unrolled { encoded, memory, run }
}

fn check_dims(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(GeneratorError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}
