/// Module for the two-level sentence/document encoder.
pub mod encoder;

/// Module for the attention decoder and its feedback modes.
pub mod decoder;

/// Module for the generator that ties encoder, decoder and optimizer together.
pub mod generator;
