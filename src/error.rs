use thiserror::Error;

/// Errors raised while building, feeding or persisting a generator
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch for '{name}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid length in '{name}' at {index}: {length} exceeds maximum {max}")]
    InvalidLength {
        name: String,
        index: usize,
        length: usize,
        max: usize,
    },

    #[error("Token id {token} in '{name}' is outside the vocabulary of size {vocab_size}")]
    TokenOutOfRange {
        name: String,
        token: usize,
        vocab_size: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GeneratorError {
    fn from(error: serde_json::Error) -> Self {
        GeneratorError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for GeneratorError {
    fn from(error: bincode::Error) -> Self {
        GeneratorError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeneratorError>;
