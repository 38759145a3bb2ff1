//! Evaluation runs
//!
//! Reconstructs the model and its preprocessing from a checkpoint, then
//! scores each configured split: an event-based pass over strong labels
//! followed by a clip-level pass over weak labels. Predicted events for
//! the validation split can be written out as a tab-separated file.

use std::path::Path;

use crate::checkpoint::ExperimentState;
use crate::config::EvalConfig;
use crate::dataset::{DataView, DatasetIndex, LabelEncoding};
use crate::encoder::ManyHotEncoder;
use crate::error::EvalError;
use crate::features::FeatureStore;
use crate::inference::{get_predictions, save_predictions, weak_probabilities, PredictedEvent};
use crate::metrics::{
    event_based_f1, f_measure_by_class, format_class_table, macro_f1, ClassMetrics,
    EventBasedMetrics, TimedEvent,
};
use crate::model::Crnn;
use crate::preprocessing::Scaler;

/// Name of the split whose predictions may be written out
const PREDICTIONS_SPLIT: &str = "validation";

/// Scores of one evaluated split
#[derive(Debug, Clone)]
pub struct SplitReport {
    /// Split name
    pub name: String,
    /// Number of evaluated clips
    pub n_clips: usize,
    /// Event-based per-class scores under onset/offset collars
    pub event_metrics: EventBasedMetrics,
    /// Clip-level per-class scores at the decision threshold
    pub weak_metrics: Vec<ClassMetrics>,
}

impl SplitReport {
    /// Event-based macro F1
    pub fn event_macro_f1(&self) -> f64 {
        self.event_metrics.macro_f1()
    }

    /// Clip-level macro F1
    pub fn weak_macro_f1(&self) -> f64 {
        macro_f1(&self.weak_metrics)
    }
}

/// Scores of a full evaluation run, split by split
#[derive(Debug, Clone)]
pub struct EvalSummary {
    /// Checkpoint epoch the scores belong to
    pub epoch: u32,
    /// Per-split reports, in evaluation order
    pub splits: Vec<SplitReport>,
}

/// Reference events of a split as timed events in seconds
pub fn reference_events(index: &DatasetIndex) -> Vec<TimedEvent> {
    index
        .filenames()
        .iter()
        .flat_map(|filename| {
            index
                .events_for(filename)
                .into_iter()
                .map(|(label, onset, offset)| TimedEvent {
                    filename: filename.clone(),
                    label,
                    onset,
                    offset,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn predicted_to_timed(events: &[PredictedEvent]) -> Vec<TimedEvent> {
    events
        .iter()
        .map(|event| TimedEvent {
            filename: event.filename.clone(),
            label: event.event_label.clone(),
            onset: event.onset,
            offset: event.offset,
        })
        .collect()
}

/// Evaluate a checkpoint on every configured split.
///
/// When `subpart_data` is given, each split is restricted to its first N
/// metadata rows. When `predictions_path` is given, the validation split's
/// predicted events are written there, replacing any existing file.
///
/// # Errors
///
/// Fails on a malformed checkpoint, an unreadable split, or any feature
/// extraction or inference failure.
pub fn run_evaluation(
    state: &ExperimentState,
    config: &EvalConfig,
    subpart_data: Option<usize>,
    predictions_path: Option<&Path>,
) -> Result<EvalSummary, EvalError> {
    let model = Crnn::new(&state.model.kwargs, &state.model.state_dict)?;
    if model.pooling_time_ratio() != state.pooling_time_ratio {
        log::warn!(
            "Checkpoint pooling_time_ratio {} disagrees with the model's pooling stack ({})",
            state.pooling_time_ratio,
            model.pooling_time_ratio()
        );
    }
    let scaler = Scaler::from_state(&state.scaler)?;
    let encoder = ManyHotEncoder::from_state(&state.many_hot_encoder);
    log::info!("Model loaded at epoch: {}", state.epoch);

    let classes: Vec<String> = encoder.labels().to_vec();
    let mut reports = Vec::new();

    for split in config.splits() {
        log::info!("Evaluating split: {}", split.name);
        let index = DatasetIndex::from_metadata(&split.metadata, subpart_data)?;
        let store = FeatureStore::new(config, &split.audio_dir)?;

        // Strong pass: timed events under collars
        let strong_view = DataView::new(
            &index,
            &store,
            &scaler,
            &encoder,
            LabelEncoding::Strong,
            config.frame_duration(),
        );
        let predictions = get_predictions(
            &model,
            &strong_view,
            &encoder,
            config,
            state.pooling_time_ratio,
        )?;
        let event_metrics = event_based_f1(
            &reference_events(&index),
            &predicted_to_timed(&predictions),
            &classes,
        );
        log::info!(
            "Event-based F1 per class on {}:\n{}",
            split.name,
            format_class_table(&event_metrics.classes)
        );
        log::info!(
            "Event-based macro F1 on {}: {:.4}",
            split.name,
            event_metrics.macro_f1()
        );

        // Weak pass: clip-level probabilities against many-hot targets
        let weak_view = DataView::new(
            &index,
            &store,
            &scaler,
            &encoder,
            LabelEncoding::Weak,
            config.frame_duration(),
        );
        let probabilities = weak_probabilities(&model, &weak_view, config)?;
        let targets: Vec<Vec<f32>> = probabilities
            .iter()
            .map(|(filename, _)| encoder.encode_weak(&index.weak_labels_for(filename)))
            .collect();
        let weak_probs: Vec<Vec<f32>> = probabilities.into_iter().map(|(_, p)| p).collect();
        let weak_metrics = f_measure_by_class(
            &targets,
            &weak_probs,
            &classes,
            config.decision_threshold,
        );
        log::info!(
            "Weak F1 per class on {}:\n{}",
            split.name,
            format_class_table(&weak_metrics)
        );
        log::info!(
            "Weak macro F1 on {}: {:.4}",
            split.name,
            macro_f1(&weak_metrics)
        );

        if split.name == PREDICTIONS_SPLIT {
            if let Some(path) = predictions_path {
                save_predictions(&predictions, path)?;
            }
        }

        reports.push(SplitReport {
            name: split.name,
            n_clips: strong_view.len(),
            event_metrics,
            weak_metrics,
        });
    }

    Ok(EvalSummary {
        epoch: state.epoch,
        splits: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_reference_events_from_index() {
        let dir = std::env::temp_dir().join(format!("sed_eval_refs_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("meta.csv");
        fs::write(
            &path,
            "filename\tonset\toffset\tevent_label\n\
             a.wav\t0.0\t1.0\tDog\n\
             a.wav\t2.0\t3.0\tAlarm\n\
             b.wav\t\t\t\n",
        )
        .unwrap();

        let index = DatasetIndex::from_metadata(&path, None).unwrap();
        let events = reference_events(&index);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].filename, "a.wav");
        assert_eq!(events[1].label, "Alarm");

        fs::remove_dir_all(&dir).ok();
    }
}
