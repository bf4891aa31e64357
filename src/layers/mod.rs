/// Batched LSTM cell with hand-written backward pass.
pub mod lstm_cell;

/// Length-aware unidirectional and bidirectional LSTM runners.
pub mod dynamic_rnn;

pub mod linear;
pub mod embedding;

/// Additive attention over encoder states.
pub mod attention;
