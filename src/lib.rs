//! # SED Eval
//!
//! An evaluation engine for pretrained sound event detection models,
//! scoring frame-level (strong) and clip-level (weak) predictions on
//! DCASE-style datasets.
//!
//! ## Features
//!
//! - **Checkpoint loading**: Model weights, feature scaler and label encoder restored from one persisted record
//! - **Log-mel features**: 44.1 kHz STFT front end with on-disk caching per extraction configuration
//! - **CRNN inference**: Convolutional blocks with GLU gating, stacked bidirectional GRU, attention-pooled weak output
//! - **Metrics**: Event-based F1 under onset/offset collars and clip-level F1 per class
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use sed_eval::{run_evaluation, EvalConfig, ExperimentState};
//!
//! let state = ExperimentState::load(Path::new("stored_data/model/baseline_epoch_10.json"))?;
//! let summary = run_evaluation(&state, &EvalConfig::default(), None, None)?;
//!
//! for split in &summary.splits {
//!     println!("{}: event F1 {:.4}", split.name, split.event_macro_f1());
//! }
//! # Ok::<(), sed_eval::EvalError>(())
//! ```
//!
//! ## Architecture
//!
//! The evaluation pipeline follows this flow:
//!
//! ```text
//! Checkpoint → Dataset Index → Features (cached) → Scaler → CRNN → Post-processing → Metrics
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod preprocessing;

// Re-export main types
pub use checkpoint::ExperimentState;
pub use config::EvalConfig;
pub use error::EvalError;
pub use evaluation::{run_evaluation, EvalSummary, SplitReport};
