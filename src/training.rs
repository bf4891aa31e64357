use ndarray::{Array1, Array2};
use tracing::warn;

use crate::models::decoder::DecoderGradients;
use crate::models::encoder::EncoderGradients;
use crate::layers::linear::LinearGradients;

/// One gradient per trainable tensor of the generator
#[derive(Clone, Debug)]
pub struct GeneratorGradients {
    pub embedding: Array2<f64>,
    pub encoder: EncoderGradients,
    pub decoder: DecoderGradients,
    pub output_projection: LinearGradients,
}

impl GeneratorGradients {
    pub fn tensors(&self) -> Vec<&Array2<f64>> {
        let mut tensors = vec![&self.embedding];
        tensors.extend(self.encoder.tensors());
        tensors.extend(self.decoder.tensors());
        tensors.extend(self.output_projection.tensors());
        tensors
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut tensors = vec![&mut self.embedding];
        tensors.extend(self.encoder.tensors_mut());
        tensors.extend(self.decoder.tensors_mut());
        tensors.extend(self.output_projection.tensors_mut());
        tensors
    }

    pub fn global_norm(&self) -> f64 {
        global_norm(&self.tensors())
    }

    /// Rescale every gradient so the global norm is at most `max_norm`
    ///
    /// Returns the norm before clipping.
    pub fn clip_by_global_norm(&mut self, max_norm: f64) -> f64 {
        clip_by_global_norm(&mut self.tensors_mut(), max_norm)
    }
}

/// Result of one pretraining step
#[derive(Clone, Debug)]
pub struct PretrainOutput {
    /// Mean sequence loss over the batch
    pub loss: f64,
    /// Step counter after the update
    pub global_step: u64,
    pub per_example_loss: Array1<f64>,
    /// Gradient norm before clipping
    pub global_norm: f64,
}

/// sqrt of the sum of squares over all tensors
pub fn global_norm(tensors: &[&Array2<f64>]) -> f64 {
    tensors
        .iter()
        .map(|t| t.iter().map(|x| x * x).sum::<f64>())
        .sum::<f64>()
        .sqrt()
}

/// Scale all tensors by `max_norm / max(norm, max_norm)` and return the pre-clip norm
pub fn clip_by_global_norm(tensors: &mut [&mut Array2<f64>], max_norm: f64) -> f64 {
    let norm = tensors
        .iter()
        .map(|t| t.iter().map(|x| x * x).sum::<f64>())
        .sum::<f64>()
        .sqrt();

    if norm > max_norm {
        warn!(global_norm = norm, max_norm, "clipping gradients");
        let scale = max_norm / norm;
        for tensor in tensors.iter_mut() {
            tensor.mapv_inplace(|x| x * scale);
        }
    }

    norm
}
