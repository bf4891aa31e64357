use serde::{Deserialize, Serialize};
use ndarray::{Array2, Dimension};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::config::GeneratorConfig;
use crate::error::{GeneratorError, Result};
use crate::layers::attention::AdditiveAttention;
use crate::layers::embedding::Embedding;
use crate::layers::linear::LinearLayer;
use crate::layers::lstm_cell::LSTMCell;
use crate::models::decoder::AttentionDecoder;
use crate::models::encoder::HierarchicalEncoder;
use crate::models::generator::Generator;

/// Serializable version of Array2<f64> for persistence
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SerializableArray2 {
    data: Vec<f64>,
    shape: (usize, usize),
}

impl From<&Array2<f64>> for SerializableArray2 {
    fn from(array: &Array2<f64>) -> Self {
        Self {
            data: array.iter().cloned().collect(),
            shape: array.raw_dim().into_pattern(),
        }
    }
}

impl TryFrom<SerializableArray2> for Array2<f64> {
    type Error = GeneratorError;

    fn try_from(array: SerializableArray2) -> Result<Self> {
        let (rows, cols) = array.shape;
        let len = array.data.len();
        Array2::from_shape_vec(array.shape, array.data).map_err(|_| GeneratorError::ShapeMismatch {
            name: "serialized array".to_string(),
            expected: vec![rows, cols],
            got: vec![len],
        })
    }
}

/// Serializable LSTM cell parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SerializableLSTMCell {
    w_ih: SerializableArray2,
    w_hh: SerializableArray2,
    bias: SerializableArray2,
    forget_bias: f64,
}

impl From<&LSTMCell> for SerializableLSTMCell {
    fn from(cell: &LSTMCell) -> Self {
        Self {
            w_ih: (&cell.w_ih).into(),
            w_hh: (&cell.w_hh).into(),
            bias: (&cell.bias).into(),
            forget_bias: cell.forget_bias,
        }
    }
}

impl TryFrom<SerializableLSTMCell> for LSTMCell {
    type Error = GeneratorError;

    fn try_from(cell: SerializableLSTMCell) -> Result<Self> {
        let w_ih = Array2::<f64>::try_from(cell.w_ih)?;
        let w_hh = Array2::<f64>::try_from(cell.w_hh)?;
        let bias = Array2::<f64>::try_from(cell.bias)?;

        let hidden_size = w_hh.ncols();
        let input_size = w_ih.ncols();
        expect_shape("lstm w_ih", w_ih.shape(), &[4 * hidden_size, input_size])?;
        expect_shape("lstm w_hh", w_hh.shape(), &[4 * hidden_size, hidden_size])?;
        expect_shape("lstm bias", bias.shape(), &[4 * hidden_size, 1])?;

        Ok(LSTMCell {
            w_ih,
            w_hh,
            bias,
            input_size,
            hidden_size,
            forget_bias: cell.forget_bias,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SerializableLinear {
    weight: SerializableArray2,
    bias: SerializableArray2,
}

impl From<&LinearLayer> for SerializableLinear {
    fn from(layer: &LinearLayer) -> Self {
        Self {
            weight: (&layer.weight).into(),
            bias: (&layer.bias).into(),
        }
    }
}

impl TryFrom<SerializableLinear> for LinearLayer {
    type Error = GeneratorError;

    fn try_from(layer: SerializableLinear) -> Result<Self> {
        let weight = Array2::<f64>::try_from(layer.weight)?;
        let bias = Array2::<f64>::try_from(layer.bias)?;
        expect_shape("linear bias", bias.shape(), &[weight.nrows(), 1])?;
        Ok(LinearLayer::from_weights(weight, bias))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SerializableAttention {
    w_states: SerializableArray2,
    query: SerializableLinear,
    v: SerializableArray2,
}

impl From<&AdditiveAttention> for SerializableAttention {
    fn from(attention: &AdditiveAttention) -> Self {
        Self {
            w_states: (&attention.w_states).into(),
            query: (&attention.query).into(),
            v: (&attention.v).into(),
        }
    }
}

impl TryFrom<SerializableAttention> for AdditiveAttention {
    type Error = GeneratorError;

    fn try_from(attention: SerializableAttention) -> Result<Self> {
        let w_states = Array2::<f64>::try_from(attention.w_states)?;
        let query = LinearLayer::try_from(attention.query)?;
        let v = Array2::<f64>::try_from(attention.v)?;

        let attn_size = w_states.nrows();
        expect_shape("attention w_states", w_states.shape(), &[attn_size, attn_size])?;
        expect_shape("attention v", v.shape(), &[attn_size, 1])?;
        expect_shape("attention query", &[query.output_size], &[attn_size])?;

        Ok(AdditiveAttention { w_states, query, v })
    }
}

/// Every trainable tensor of a [`Generator`]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SerializableGenerator {
    embedding: SerializableArray2,
    sentence_forward: SerializableLSTMCell,
    sentence_backward: SerializableLSTMCell,
    document: SerializableLSTMCell,
    decoder_input_mix: SerializableLinear,
    decoder_cell: SerializableLSTMCell,
    decoder_attention: SerializableAttention,
    decoder_output_mix: SerializableLinear,
    output_projection: SerializableLinear,
}

impl From<&Generator> for SerializableGenerator {
    fn from(generator: &Generator) -> Self {
        let encoder = &generator.encoder;
        let decoder = &generator.decoder;
        Self {
            embedding: (&generator.embedding.weight).into(),
            sentence_forward: (&encoder.sentence.forward_cell).into(),
            sentence_backward: (&encoder.sentence.backward_cell).into(),
            document: (&encoder.document).into(),
            decoder_input_mix: (&decoder.input_mix).into(),
            decoder_cell: (&decoder.cell).into(),
            decoder_attention: (&decoder.attention).into(),
            decoder_output_mix: (&decoder.output_mix).into(),
            output_projection: (&generator.output_projection).into(),
        }
    }
}

/// Information stored next to the parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GeneratorMetadata {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub config: GeneratorConfig,
    pub global_step: u64,
    pub description: Option<String>,
}

impl GeneratorMetadata {
    /// Metadata for `generator` stamped with the current time and crate version
    pub fn for_generator(generator: &Generator, model_name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            model_name: model_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            config: generator.config().clone(),
            global_step: generator.global_step(),
            description,
        }
    }
}

/// Complete saved generator: parameters and metadata
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SavedGenerator {
    pub parameters: SerializableGenerator,
    pub metadata: GeneratorMetadata,
}

impl SavedGenerator {
    pub fn new(generator: &Generator, metadata: GeneratorMetadata) -> Self {
        Self {
            parameters: generator.into(),
            metadata,
        }
    }

    /// Rebuild the generator; the optimizer state starts fresh
    pub fn into_generator(self) -> Result<(Generator, GeneratorMetadata)> {
        let p = self.parameters;
        let encoder = HierarchicalEncoder::from_cells(
            LSTMCell::try_from(p.sentence_forward)?,
            LSTMCell::try_from(p.sentence_backward)?,
            LSTMCell::try_from(p.document)?,
        );
        let decoder = AttentionDecoder {
            input_mix: LinearLayer::try_from(p.decoder_input_mix)?,
            cell: LSTMCell::try_from(p.decoder_cell)?,
            attention: AdditiveAttention::try_from(p.decoder_attention)?,
            output_mix: LinearLayer::try_from(p.decoder_output_mix)?,
        };

        let generator = Generator::from_parts(
            self.metadata.config.clone(),
            Embedding::from_weights(Array2::<f64>::try_from(p.embedding)?),
            encoder,
            decoder,
            LinearLayer::try_from(p.output_projection)?,
            self.metadata.global_step,
        )?;
        Ok((generator, self.metadata))
    }
}

/// Snapshot file operations
pub struct ModelPersistence;

impl ModelPersistence {
    /// Save to JSON format (human-readable)
    pub fn save_to_json<P: AsRef<Path>>(model: &SavedGenerator, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(model)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<SavedGenerator> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let model = serde_json::from_str(&contents)?;
        Ok(model)
    }

    /// Save to binary format (compact and fast)
    pub fn save_to_binary<P: AsRef<Path>>(model: &SavedGenerator, path: P) -> Result<()> {
        let encoded = bincode::serialize(model)?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    pub fn load_from_binary<P: AsRef<Path>>(path: P) -> Result<SavedGenerator> {
        let mut file = File::open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let model = bincode::deserialize(&contents)?;
        Ok(model)
    }
}

/// Save/load with the format picked by file extension (`.json`, anything else binary)
pub trait PersistentModel {
    fn save<P: AsRef<Path>>(&self, path: P, metadata: GeneratorMetadata) -> Result<()>;

    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, GeneratorMetadata)>
    where
        Self: Sized;
}

impl PersistentModel for Generator {
    fn save<P: AsRef<Path>>(&self, path: P, metadata: GeneratorMetadata) -> Result<()> {
        let saved = SavedGenerator::new(self, metadata);
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => ModelPersistence::save_to_json(&saved, path),
            _ => ModelPersistence::save_to_binary(&saved, path),
        }
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, GeneratorMetadata)> {
        let saved = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => ModelPersistence::load_from_json(path)?,
            _ => ModelPersistence::load_from_binary(path)?,
        };
        saved.into_generator()
    }
}

fn expect_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(GeneratorError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_array_with_wrong_length_is_rejected() {
        let broken = SerializableArray2 {
            data: vec![1.0, 2.0, 3.0],
            shape: (2, 2),
        };
        assert!(matches!(
            Array2::<f64>::try_from(broken),
            Err(GeneratorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_lstm_cell_conversion_keeps_weights() {
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(3);
        let cell = LSTMCell::new(3, 2, 0.1, &mut rng).with_forget_bias(0.5);
        let restored = LSTMCell::try_from(SerializableLSTMCell::from(&cell)).unwrap();

        assert_eq!(restored.w_ih, cell.w_ih);
        assert_eq!(restored.input_size, 3);
        assert_eq!(restored.hidden_size, 2);
        assert_eq!(restored.forget_bias, 0.5);
    }

    #[test]
    fn test_linear_with_mismatched_bias_is_rejected() {
        let layer = SerializableLinear {
            weight: (&arr2(&[[1.0, 2.0], [3.0, 4.0]])).into(),
            bias: (&arr2(&[[0.0], [0.0], [0.0]])).into(),
        };
        assert!(LinearLayer::try_from(layer).is_err());
    }
}
