use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::Rng;

use crate::batch::Batch;
use crate::layers::dynamic_rnn::{BidirectionalCache, BidirectionalLstm, DynamicLstm, DynamicLstmCache};
use crate::layers::embedding::Embedding;
use crate::layers::lstm_cell::{LSTMCell, LSTMCellGradients};
use crate::optimizers::Optimizer;

/// Gradients for the three encoder LSTMs
#[derive(Clone, Debug)]
pub struct EncoderGradients {
    pub sentence_forward: LSTMCellGradients,
    pub sentence_backward: LSTMCellGradients,
    pub document: LSTMCellGradients,
}

impl EncoderGradients {
    pub fn tensors(&self) -> Vec<&Array2<f64>> {
        let mut tensors = self.sentence_forward.tensors();
        tensors.extend(self.sentence_backward.tensors());
        tensors.extend(self.document.tensors());
        tensors
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut tensors = self.sentence_forward.tensors_mut();
        tensors.extend(self.sentence_backward.tensors_mut());
        tensors.extend(self.document.tensors_mut());
        tensors
    }
}

#[derive(Clone, Debug)]
pub struct EncoderCache {
    /// Token ids per sentence step, in `batch * max_enc_num` sentence order
    pub token_ids: Vec<Array1<usize>>,
    pub sentence: BidirectionalCache,
    pub document: DynamicLstmCache,
    pub batch_size: usize,
    pub max_enc_num: usize,
}

/// Everything the decoder reads from the encoder
#[derive(Clone, Debug)]
pub struct EncoderOutput {
    /// Document LSTM outputs, one `(hidden, batch)` matrix per sentence slot
    pub attention_states: Vec<Array2<f64>>,
    pub final_h: Array2<f64>,
    pub final_c: Array2<f64>,
    pub cache: EncoderCache,
}

/// Two-level encoder: sentences through a bidirectional LSTM, then the
/// per-sentence vectors through a document LSTM
///
/// A sentence is summarised by `[forward final h; backward final h]`. The
/// document LSTM runs over those summaries with each document's sentence count
/// as its length; its outputs become the attention states and its final state
/// seeds the decoder.
#[derive(Clone, Debug)]
pub struct HierarchicalEncoder {
    pub sentence: BidirectionalLstm,
    pub document: LSTMCell,
}

impl HierarchicalEncoder {
    pub fn new<R: Rng>(emb_dim: usize, hidden_dim: usize, init_mag: f64, rng: &mut R) -> Self {
        let forward = LSTMCell::new(emb_dim, hidden_dim, init_mag, rng);
        let backward = LSTMCell::new(emb_dim, hidden_dim, init_mag, rng);
        let document = LSTMCell::new(2 * hidden_dim, hidden_dim, init_mag, rng);

        Self {
            sentence: BidirectionalLstm::new(forward, backward),
            document,
        }
    }

    pub fn from_cells(sentence_forward: LSTMCell, sentence_backward: LSTMCell, document: LSTMCell) -> Self {
        Self {
            sentence: BidirectionalLstm::new(sentence_forward, sentence_backward),
            document,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.document.hidden_size
    }

    pub fn forward(&self, embedding: &Embedding, batch: &Batch) -> EncoderOutput {
        let (batch_size, max_enc_num, max_enc_steps) = batch.enc_batch.dim();

        // Sentence n of document b becomes column b * max_enc_num + n
        let token_ids: Vec<Array1<usize>> = (0..max_enc_steps)
            .map(|step| batch.enc_batch.slice(s![.., .., step]).iter().copied().collect())
            .collect();
        let inputs: Vec<Array2<f64>> = token_ids.iter().map(|ids| embedding.lookup(ids.view())).collect();

        let sentence_lens = batch.flat_sentence_lens();
        let sentences = self.sentence.run(&inputs, &sentence_lens);
        let summaries = concatenate![Axis(0), sentences.forward_final.0, sentences.backward_final.0];

        let document_inputs: Vec<Array2<f64>> = (0..max_enc_num)
            .map(|n| {
                let columns: Vec<usize> = (0..batch_size).map(|b| b * max_enc_num + n).collect();
                summaries.select(Axis(1), &columns)
            })
            .collect();

        let enc_lens = batch.enc_lens.to_vec();
        let (h0, c0) = self.document.zero_state(batch_size);
        let document = DynamicLstm::run(&self.document, &document_inputs, &enc_lens, &h0, &c0);

        EncoderOutput {
            attention_states: document.outputs,
            final_h: document.final_h,
            final_c: document.final_c,
            cache: EncoderCache {
                token_ids,
                sentence: sentences.cache,
                document: document.cache,
                batch_size,
                max_enc_num,
            },
        }
    }

    /// Backpropagate from the attention states and the final state down to the embedding
    pub fn backward(
        &self,
        cache: &EncoderCache,
        d_attention_states: &[Array2<f64>],
        d_final_h: &Array2<f64>,
        d_final_c: &Array2<f64>,
        embedding_grad: &mut Array2<f64>,
    ) -> EncoderGradients {
        let hidden = self.sentence.hidden_size();
        let document = DynamicLstm::backward(
            &self.document,
            &cache.document,
            Some(d_attention_states),
            d_final_h,
            d_final_c,
        );

        let mut d_summaries = Array2::zeros((2 * hidden, cache.batch_size * cache.max_enc_num));
        for (n, d_input) in document.inputs.iter().enumerate() {
            for b in 0..cache.batch_size {
                d_summaries
                    .column_mut(b * cache.max_enc_num + n)
                    .assign(&d_input.column(b));
            }
        }

        let d_forward_h = d_summaries.slice(s![..hidden, ..]).to_owned();
        let d_backward_h = d_summaries.slice(s![hidden.., ..]).to_owned();
        let sentence = self
            .sentence
            .backward_from_final(&cache.sentence, &d_forward_h, &d_backward_h);

        for (d_input, ids) in sentence.inputs.iter().zip(&cache.token_ids) {
            Embedding::accumulate_gradient(d_input, ids.view(), embedding_grad);
        }

        EncoderGradients {
            sentence_forward: sentence.forward_cell,
            sentence_backward: sentence.backward_cell,
            document: document.cell,
        }
    }

    pub fn update_parameters<O: Optimizer>(&mut self, gradients: &EncoderGradients, optimizer: &mut O, prefix: &str) {
        self.sentence.forward_cell.update_parameters(
            &gradients.sentence_forward,
            optimizer,
            &format!("{}_sentence_fw", prefix),
        );
        self.sentence.backward_cell.update_parameters(
            &gradients.sentence_backward,
            optimizer,
            &format!("{}_sentence_bw", prefix),
        );
        self.document
            .update_parameters(&gradients.document, optimizer, &format!("{}_document", prefix));
    }

    pub fn zero_gradients(&self) -> EncoderGradients {
        EncoderGradients {
            sentence_forward: self.sentence.forward_cell.zero_gradients(),
            sentence_backward: self.sentence.backward_cell.zero_gradients(),
            document: self.document.zero_gradients(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.sentence.forward_cell.num_parameters()
            + self.sentence.backward_cell.num_parameters()
            + self.document.num_parameters()
    }
}
