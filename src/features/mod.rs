//! Feature extraction
//!
//! Log-mel spectrogram extraction and the per-configuration feature cache
//! the dataset indexer points clips at.

pub mod mel;
pub mod store;

pub use mel::MelExtractor;
pub use store::FeatureStore;
