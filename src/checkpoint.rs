//! Persisted experiment state
//!
//! A training run persists everything the evaluation needs to reconstruct
//! the model and its preprocessing: the model hyperparameters and weights,
//! the pooling time ratio, the fitted feature scaler, and the fitted label
//! encoder. The whole record is loaded as one immutable value; each
//! component is restored through a pure "from saved state" constructor so
//! the reconstruction path has no hidden configuration lookups.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoder::EncoderState;
use crate::error::EvalError;
use crate::model::{CrnnConfig, CrnnWeights};
use crate::preprocessing::ScalerState;

/// A dense float tensor with explicit shape, as stored in checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,
    /// Row-major data; `data.len()` must equal the shape product
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a zero-filled tensor of the given shape
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    /// Create a tensor from shape and data, validating their consistency
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, EvalError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(EvalError::Checkpoint(format!(
                "tensor data length {} does not match shape {:?} (expected {})",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Check that this tensor has exactly the expected shape
    pub fn expect_shape(&self, expected: &[usize], what: &str) -> Result<(), EvalError> {
        if self.shape != expected {
            return Err(EvalError::Checkpoint(format!(
                "{}: expected shape {:?}, got {:?}",
                what, expected, self.shape
            )));
        }
        if self.data.len() != expected.iter().product::<usize>() {
            return Err(EvalError::Checkpoint(format!(
                "{}: data length {} inconsistent with shape {:?}",
                what,
                self.data.len(),
                self.shape
            )));
        }
        Ok(())
    }

    /// View as a 2-D array; fails if the tensor is not 2-D or inconsistent
    pub fn to_array2(&self) -> Result<ndarray::Array2<f32>, EvalError> {
        if self.shape.len() != 2 {
            return Err(EvalError::Checkpoint(format!(
                "expected 2-D tensor, got shape {:?}",
                self.shape
            )));
        }
        ndarray::Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data.clone())
            .map_err(|e| EvalError::Checkpoint(format!("tensor reshape failed: {}", e)))
    }

    /// Value at a 4-D index (used for convolution kernels without
    /// materializing an owned 4-D array)
    #[inline]
    pub fn at4(&self, a: usize, b: usize, c: usize, d: usize) -> f32 {
        let (s1, s2, s3) = (self.shape[1], self.shape[2], self.shape[3]);
        self.data[((a * s1 + b) * s2 + c) * s3 + d]
    }
}

/// Saved model entry: hyperparameters plus weight tensors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// Hyperparameters the model class is reconstructed from
    pub kwargs: CrnnConfig,
    /// Weight tensors keyed by layer
    pub state_dict: CrnnWeights,
}

/// The complete persisted training state consumed by the evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentState {
    /// Epoch the checkpoint was taken at
    pub epoch: u32,

    /// Model hyperparameters and weights
    pub model: ModelState,

    /// Integer downsampling factor between model input frames and output frames
    pub pooling_time_ratio: usize,

    /// Fitted feature scaler state
    pub scaler: ScalerState,

    /// Fitted label encoder state (ordered class vocabulary)
    pub many_hot_encoder: EncoderState,
}

impl ExperimentState {
    /// Load a checkpoint from a JSON file.
    ///
    /// Any missing required key (e.g. `scaler`) fails here, before any
    /// model construction or inference is attempted.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Checkpoint` on a missing/unreadable file or a
    /// malformed record.
    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let content = fs::read_to_string(path).map_err(|e| {
            EvalError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
        })?;
        let state: ExperimentState = serde_json::from_str(&content).map_err(|e| {
            EvalError::Checkpoint(format!("malformed checkpoint {}: {}", path.display(), e))
        })?;

        if state.pooling_time_ratio == 0 {
            return Err(EvalError::Checkpoint(
                "pooling_time_ratio must be >= 1".to_string(),
            ));
        }

        log::debug!(
            "Loaded checkpoint {} (epoch {}, {} classes)",
            path.display(),
            state.epoch,
            state.many_hot_encoder.labels.len()
        );
        Ok(state)
    }
}
