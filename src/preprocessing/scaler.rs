//! Feature scaler
//!
//! Standardizes each mel band to zero mean and unit variance using
//! statistics fitted on the training set and carried in the checkpoint.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Numerical stability epsilon for the variance
const EPSILON: f32 = 1e-10;

/// Fitted scaler state as stored in checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerState {
    /// Per-band mean
    pub mean: Vec<f32>,
    /// Per-band standard deviation
    pub std: Vec<f32>,
}

/// Per-band feature standardizer
#[derive(Debug, Clone)]
pub struct Scaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Scaler {
    /// Reconstruct a scaler from its saved state
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Checkpoint` if the mean and std vectors are
    /// empty or differ in length.
    pub fn from_state(state: &ScalerState) -> Result<Self, EvalError> {
        if state.mean.is_empty() || state.mean.len() != state.std.len() {
            return Err(EvalError::Checkpoint(format!(
                "inconsistent scaler state: {} means, {} stds",
                state.mean.len(),
                state.std.len()
            )));
        }
        Ok(Self {
            mean: state.mean.clone(),
            std: state.std.clone(),
        })
    }

    /// Fit a scaler on a set of feature matrices (used when building
    /// checkpoints; evaluation restores a fitted state instead)
    pub fn fit(features: &[Array2<f32>]) -> Result<Self, EvalError> {
        let n_bands = features
            .first()
            .map(|f| f.dim().1)
            .ok_or_else(|| EvalError::InvalidInput("no features to fit scaler on".to_string()))?;

        let mut count = 0usize;
        let mut sum = vec![0.0f64; n_bands];
        let mut sum_sq = vec![0.0f64; n_bands];
        for matrix in features {
            if matrix.dim().1 != n_bands {
                return Err(EvalError::InvalidInput(
                    "feature matrices differ in band count".to_string(),
                ));
            }
            for row in matrix.rows() {
                for (band, &v) in row.iter().enumerate() {
                    sum[band] += v as f64;
                    sum_sq[band] += (v as f64) * (v as f64);
                }
                count += 1;
            }
        }
        if count == 0 {
            return Err(EvalError::InvalidInput(
                "no frames to fit scaler on".to_string(),
            ));
        }

        let mean: Vec<f32> = sum.iter().map(|&s| (s / count as f64) as f32).collect();
        let std: Vec<f32> = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(&sq, &m)| {
                let var = (sq / count as f64) as f32 - m * m;
                var.max(0.0).sqrt()
            })
            .collect();

        Ok(Self { mean, std })
    }

    /// Saved-state form of this scaler
    pub fn state(&self) -> ScalerState {
        ScalerState {
            mean: self.mean.clone(),
            std: self.std.clone(),
        }
    }

    /// Number of feature bands
    pub fn n_bands(&self) -> usize {
        self.mean.len()
    }

    /// Standardize a `[frames, bands]` feature matrix in place
    ///
    /// # Errors
    ///
    /// Returns `EvalError::InvalidInput` when the band count does not
    /// match the fitted statistics.
    pub fn transform(&self, features: &mut Array2<f32>) -> Result<(), EvalError> {
        let (_, n_bands) = features.dim();
        if n_bands != self.mean.len() {
            return Err(EvalError::InvalidInput(format!(
                "feature band count {} does not match scaler ({})",
                n_bands,
                self.mean.len()
            )));
        }
        for mut row in features.rows_mut() {
            for (band, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[band]) / (self.std[band] + EPSILON);
            }
        }
        Ok(())
    }
}
