//! Dataset indexing and data views
//!
//! Metadata files are parsed into a tabular index per split; a view pairs
//! the index with feature loading, the scaler transform and a label
//! encoding (strong frame-level or weak clip-level).

pub mod index;
pub mod view;

pub use index::{DatasetIndex, IndexRow};
pub use view::{ClipSample, DataView, LabelEncoding};
