//! Batched inference and prediction post-processing
//!
//! Runs the model over a data view batch by batch, binarizes the strong
//! output at a decision threshold, smooths each class track with a median
//! filter and decodes the result into timed events in seconds. Weak
//! probabilities are collected as-is for clip-level scoring.

use std::fs;
use std::path::Path;

use ndarray::Array2;
use rayon::prelude::*;

use crate::config::EvalConfig;
use crate::dataset::DataView;
use crate::encoder::ManyHotEncoder;
use crate::error::EvalError;
use crate::model::Crnn;

/// One predicted event, in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedEvent {
    /// Clip filename
    pub filename: String,
    /// Class label
    pub event_label: String,
    /// Event start in seconds
    pub onset: f32,
    /// Event end in seconds
    pub offset: f32,
}

/// Median-filter one class track with a centered window.
///
/// The window is clipped at the track boundaries, so edge frames see a
/// shorter window; even-length windows take the lower median, so a lone
/// active frame never survives at a track edge. A window of 1 or less is
/// the identity.
pub fn median_filter(values: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    let mut filtered = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(values.len());
        let mut neighborhood: Vec<f32> = values[start..end].to_vec();
        neighborhood.sort_by(|a, b| a.total_cmp(b));
        filtered.push(neighborhood[(neighborhood.len() - 1) / 2]);
    }
    filtered
}

/// Binarize, smooth and decode one clip's strong output into timed events.
///
/// `seconds_per_frame` is the duration of one output frame in seconds
/// (pooling time ratio times the input hop divided by the sample rate).
pub fn decode_predictions(
    filename: &str,
    strong: &Array2<f32>,
    encoder: &ManyHotEncoder,
    threshold: f32,
    median_window: usize,
    seconds_per_frame: f32,
) -> Vec<PredictedEvent> {
    let (n_frames, n_classes) = strong.dim();
    let mut binary = Array2::zeros((n_frames, n_classes));
    for class in 0..n_classes {
        let track: Vec<f32> = strong
            .column(class)
            .iter()
            .map(|&p| if p > threshold { 1.0 } else { 0.0 })
            .collect();
        for (frame, value) in median_filter(&track, median_window).into_iter().enumerate() {
            binary[[frame, class]] = value;
        }
    }

    encoder
        .decode_strong(&binary)
        .into_iter()
        .map(|segment| PredictedEvent {
            filename: filename.to_string(),
            event_label: segment.label,
            onset: segment.onset_frame as f32 * seconds_per_frame,
            offset: segment.offset_frame as f32 * seconds_per_frame,
        })
        .collect()
}

/// Run the model over a strong view and return predicted events per clip,
/// in view order.
///
/// `pooling_time_ratio` is the persisted input-to-output frame ratio from
/// the checkpoint; event times are `frame * ratio * hop / sample_rate`.
///
/// # Errors
///
/// Propagates feature loading and forward-pass failures.
pub fn get_predictions(
    model: &Crnn,
    view: &DataView,
    encoder: &ManyHotEncoder,
    config: &EvalConfig,
    pooling_time_ratio: usize,
) -> Result<Vec<PredictedEvent>, EvalError> {
    let seconds_per_frame =
        pooling_time_ratio as f32 * config.hop_length as f32 / config.sample_rate as f32;
    log::info!("Computing strong predictions for {} clips", view.len());

    let mut events = Vec::new();
    for batch in view.batches(config.batch_size) {
        let batch_events: Vec<Vec<PredictedEvent>> = batch
            .par_iter()
            .map(|filename| {
                let clip = view.load_clip(filename)?;
                let output = model.forward(&clip.features)?;
                Ok(decode_predictions(
                    filename,
                    &output.strong,
                    encoder,
                    config.decision_threshold,
                    config.median_window,
                    seconds_per_frame,
                ))
            })
            .collect::<Result<_, EvalError>>()?;
        events.extend(batch_events.into_iter().flatten());
    }
    Ok(events)
}

/// Run the model over a weak view and return `(filename, probabilities)`
/// pairs in view order.
///
/// # Errors
///
/// Propagates feature loading and forward-pass failures.
pub fn weak_probabilities(
    model: &Crnn,
    view: &DataView,
    config: &EvalConfig,
) -> Result<Vec<(String, Vec<f32>)>, EvalError> {
    log::info!("Computing weak predictions for {} clips", view.len());
    let mut predictions = Vec::new();
    for batch in view.batches(config.batch_size) {
        let batch_predictions: Vec<(String, Vec<f32>)> = batch
            .par_iter()
            .map(|filename| {
                let clip = view.load_clip(filename)?;
                let output = model.forward(&clip.features)?;
                Ok((filename.clone(), output.weak))
            })
            .collect::<Result<_, EvalError>>()?;
        predictions.extend(batch_predictions);
    }
    Ok(predictions)
}

/// Write predicted events to a tab-separated file, replacing any existing
/// file at that path.
///
/// # Errors
///
/// Returns `EvalError::Io` when the file cannot be written.
pub fn save_predictions(events: &[PredictedEvent], path: &Path) -> Result<(), EvalError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::from("filename\tonset\toffset\tevent_label\n");
    for event in events {
        out.push_str(&format!(
            "{}\t{:.3}\t{:.3}\t{}\n",
            event.filename, event.onset, event.offset, event.event_label
        ));
    }
    fs::write(path, out)?;
    log::info!("Predictions saved in: {}", path.display());
    Ok(())
}
