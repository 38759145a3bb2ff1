//! Feature preprocessing
//!
//! Per-band standardization applied to log-mel features before inference,
//! restored from the scaler state fitted at training time.

pub mod scaler;

pub use scaler::{Scaler, ScalerState};
