//! Model reconstruction and forward pass
//!
//! The CRNN is rebuilt from the hyperparameters and weight tensors stored
//! in a checkpoint and run in evaluation mode only (dropout inert, batch
//! norm on running statistics).

pub mod crnn;
pub mod layers;

pub use crnn::{Crnn, CrnnConfig, CrnnOutput, CrnnWeights};
pub use crnn::{ConvBlockWeights, GruDirectionWeights, GruLayerWeights};
