use ndarray::{Array1, Array2, Array3};

use crate::config::GeneratorConfig;
use crate::error::{GeneratorError, Result};

/// One padded batch as produced by the external batcher
///
/// Encoder tokens are laid out `[batch, sentence, token]`; decoder tensors are
/// `[batch, step]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub enc_batch: Array3<usize>,
    /// Number of valid sentences per document
    pub enc_lens: Array1<usize>,
    /// Number of valid tokens per sentence
    pub enc_sen_lens: Array2<usize>,
    pub dec_batch: Array2<usize>,
    pub target_batch: Array2<usize>,
    pub dec_padding_mask: Array2<f64>,
    pub dec_lens: Array1<usize>,
}

impl Batch {
    /// Check that every tensor matches the shapes fixed by `config`
    pub fn validate(&self, config: &GeneratorConfig) -> Result<()> {
        let b = config.batch_size;
        let n = config.max_enc_num;
        let s = config.max_enc_steps;
        let t = config.max_dec_steps;

        check_shape("enc_batch", self.enc_batch.shape(), &[b, n, s])?;
        check_shape("enc_lens", self.enc_lens.shape(), &[b])?;
        check_shape("enc_sen_lens", self.enc_sen_lens.shape(), &[b, n])?;
        check_shape("dec_batch", self.dec_batch.shape(), &[b, t])?;
        check_shape("target_batch", self.target_batch.shape(), &[b, t])?;
        check_shape("dec_padding_mask", self.dec_padding_mask.shape(), &[b, t])?;
        check_shape("dec_lens", self.dec_lens.shape(), &[b])?;

        check_lengths("enc_lens", self.enc_lens.iter(), n)?;
        check_lengths("enc_sen_lens", self.enc_sen_lens.iter(), s)?;
        check_lengths("dec_lens", self.dec_lens.iter(), t)?;

        check_tokens("enc_batch", self.enc_batch.iter(), config.vocab_size)?;
        check_tokens("dec_batch", self.dec_batch.iter(), config.vocab_size)?;
        check_tokens("target_batch", self.target_batch.iter(), config.vocab_size)?;

        Ok(())
    }

    /// Sentence lengths flattened to the `batch * max_enc_num` sentence order
    /// used by the encoder (sentence `n` of document `b` at `b * max_enc_num + n`)
    pub fn flat_sentence_lens(&self) -> Vec<usize> {
        self.enc_sen_lens.iter().copied().collect()
    }
}

fn check_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(GeneratorError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

fn check_lengths<'a>(name: &str, lengths: impl Iterator<Item = &'a usize>, max: usize) -> Result<()> {
    for (index, &length) in lengths.enumerate() {
        if length > max {
            return Err(GeneratorError::InvalidLength {
                name: name.to_string(),
                index,
                length,
                max,
            });
        }
    }
    Ok(())
}

fn check_tokens<'a>(name: &str, tokens: impl Iterator<Item = &'a usize>, vocab_size: usize) -> Result<()> {
    for &token in tokens {
        if token >= vocab_size {
            return Err(GeneratorError::TokenOutOfRange {
                name: name.to_string(),
                token,
                vocab_size,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig::default()
            .with_batch_size(2)
            .with_encoder_shape(3, 4)
            .with_max_dec_steps(5)
            .with_vocab_size(10)
    }

    fn empty_batch(config: &GeneratorConfig) -> Batch {
        let (b, n, s, t) = (config.batch_size, config.max_enc_num, config.max_enc_steps, config.max_dec_steps);
        Batch {
            enc_batch: Array3::zeros((b, n, s)),
            enc_lens: Array1::from_elem(b, n),
            enc_sen_lens: Array2::from_elem((b, n), s),
            dec_batch: Array2::zeros((b, t)),
            target_batch: Array2::zeros((b, t)),
            dec_padding_mask: Array2::ones((b, t)),
            dec_lens: Array1::from_elem(b, t),
        }
    }

    #[test]
    fn test_valid_batch_passes() {
        let config = small_config();
        assert!(empty_batch(&config).validate(&config).is_ok());
    }

    #[test]
    fn test_wrong_decoder_shape_rejected() {
        let config = small_config();
        let mut batch = empty_batch(&config);
        batch.dec_batch = Array2::zeros((2, 6));

        match batch.validate(&config) {
            Err(GeneratorError::ShapeMismatch { name, expected, got }) => {
                assert_eq!(name, "dec_batch");
                assert_eq!(expected, vec![2, 5]);
                assert_eq!(got, vec![2, 6]);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_sentence_length_over_maximum_rejected() {
        let config = small_config();
        let mut batch = empty_batch(&config);
        batch.enc_sen_lens[[1, 2]] = 5;

        match batch.validate(&config) {
            Err(GeneratorError::InvalidLength { index, length, max, .. }) => {
                assert_eq!(index, 5);
                assert_eq!(length, 5);
                assert_eq!(max, 4);
            }
            other => panic!("expected InvalidLength, got {:?}", other),
        }
    }

    #[test]
    fn test_token_outside_vocabulary_rejected() {
        let config = small_config();
        let mut batch = empty_batch(&config);
        batch.target_batch[[0, 0]] = 10;
        assert!(matches!(
            batch.validate(&config),
            Err(GeneratorError::TokenOutOfRange { token: 10, .. })
        ));
    }

    #[test]
    fn test_flat_sentence_lens_order() {
        let config = small_config();
        let mut batch = empty_batch(&config);
        batch.enc_sen_lens = ndarray::arr2(&[[1, 2, 3], [4, 0, 2]]);
        assert_eq!(batch.flat_sentence_lens(), vec![1, 2, 3, 4, 0, 2]);
    }
}
