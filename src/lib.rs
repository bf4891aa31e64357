//! # Hierarchical Seq2Seq Generator
//!
//! A hierarchical encoder-decoder text generator with hand-written
//! backpropagation, meant to sit inside an adversarial or reinforcement-style
//! training pipeline as its generator.
//!
//! ## Core Components
//!
//! - **Encoder**: a sentence-level bidirectional LSTM whose final states summarise
//!   each sentence, followed by a document-level LSTM over those summaries
//! - **Decoder**: an LSTM with additive attention over the document states
//! - **Decoding modes**: teacher-forced pretraining, sampled feedback and greedy feedback
//! - **Training**: masked sequence loss, clipping by global norm and Adagrad
//! - **Persistence**: JSON or binary parameter snapshots with metadata
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hier_seq2seq::{Batch, Generator, GeneratorConfig};
//!
//! # fn main() -> hier_seq2seq::Result<()> {
//! let config = GeneratorConfig::default().with_vocab_size(1000);
//! let mut generator = Generator::new(config)?;
//!
//! # let batch: Batch = unimplemented!();
//! // Batches come from an external batcher and must match the config's shapes
//! let output = generator.run_pre_train_step(&batch)?;
//! println!("step {} loss {:.4}", output.global_step, output.loss);
//!
//! let greedy = generator.max_generator(&batch)?;
//! # Ok(())
//! # }
//! ```

pub mod utils;
pub mod error;
pub mod config;
pub mod batch;
pub mod layers;
pub mod models;
pub mod loss;
pub mod optimizers;
pub mod training;
pub mod persistence;

// Re-export commonly used items
pub use batch::Batch;
pub use config::GeneratorConfig;
pub use error::{GeneratorError, Result};
pub use models::decoder::Feedback;
pub use models::generator::Generator;
pub use optimizers::{Adagrad, Optimizer};
pub use loss::SequenceLoss;
pub use training::{GeneratorGradients, PretrainOutput};
pub use persistence::{GeneratorMetadata, ModelPersistence, PersistentModel, SavedGenerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_integration() {
        let config = GeneratorConfig::default()
            .with_batch_size(1)
            .with_encoder_shape(2, 3)
            .with_max_dec_steps(2)
            .with_dims(4, 5)
            .with_vocab_size(9);
        let generator = Generator::new(config).unwrap();

        assert_eq!(generator.global_step(), 0);
        assert!(generator.num_parameters() > 0);
    }
}
