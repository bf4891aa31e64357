use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{GeneratorError, Result};

/// Hyperparameters of the hierarchical generator
///
/// Shapes (`batch_size`, `max_enc_num`, `max_enc_steps`, `max_dec_steps`) are
/// fixed per generator: every [`Batch`](crate::batch::Batch) fed to it must
/// match them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub batch_size: usize,
    /// Sentences per document
    pub max_enc_num: usize,
    /// Tokens per sentence
    pub max_enc_steps: usize,
    pub max_dec_steps: usize,
    pub emb_dim: usize,
    pub hidden_dim: usize,
    pub vocab_size: usize,
    pub lr: f64,
    pub adagrad_init_acc: f64,
    pub rand_unif_init_mag: f64,
    pub trunc_norm_init_std: f64,
    pub max_grad_norm: f64,
    pub encoder_seed: u64,
    pub decoder_seed: u64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            batch_size: 16,
            max_enc_num: 10,
            max_enc_steps: 40,
            max_dec_steps: 50,
            emb_dim: 128,
            hidden_dim: 256,
            vocab_size: 50_000,
            lr: 0.15,
            adagrad_init_acc: 0.1,
            rand_unif_init_mag: 0.02,
            trunc_norm_init_std: 1e-4,
            max_grad_norm: 2.0,
            encoder_seed: 123,
            decoder_seed: 113,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_encoder_shape(mut self, max_enc_num: usize, max_enc_steps: usize) -> Self {
        self.max_enc_num = max_enc_num;
        self.max_enc_steps = max_enc_steps;
        self
    }

    pub fn with_max_dec_steps(mut self, max_dec_steps: usize) -> Self {
        self.max_dec_steps = max_dec_steps;
        self
    }

    pub fn with_dims(mut self, emb_dim: usize, hidden_dim: usize) -> Self {
        self.emb_dim = emb_dim;
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_max_grad_norm(mut self, max_grad_norm: f64) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: GeneratorConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("batch_size", self.batch_size),
            ("max_enc_num", self.max_enc_num),
            ("max_enc_steps", self.max_enc_steps),
            ("max_dec_steps", self.max_dec_steps),
            ("emb_dim", self.emb_dim),
            ("hidden_dim", self.hidden_dim),
            ("vocab_size", self.vocab_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(GeneratorError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        let positives = [
            ("lr", self.lr),
            ("adagrad_init_acc", self.adagrad_init_acc),
            ("max_grad_norm", self.max_grad_norm),
            ("trunc_norm_init_std", self.trunc_norm_init_std),
        ];
        for (name, value) in positives {
            if !(value > 0.0) || !value.is_finite() {
                return Err(GeneratorError::InvalidConfig(format!(
                    "{} must be a positive finite number, got {}",
                    name, value
                )));
            }
        }

        if !(self.rand_unif_init_mag >= 0.0) {
            return Err(GeneratorError::InvalidConfig(
                "rand_unif_init_mag must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}
