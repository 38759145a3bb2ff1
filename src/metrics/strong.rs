//! Event-based scoring of timed predictions
//!
//! A predicted event matches a reference event of the same class in the
//! same clip when its onset lies within a fixed collar of the reference
//! onset and its offset within a collar that widens with the reference
//! duration. Matching is greedy per clip and class: each reference claims
//! at most one prediction and each prediction at most one reference.

use std::collections::HashMap;

use crate::metrics::{macro_f1, ClassMetrics};

/// Onset collar in seconds
pub const ONSET_COLLAR: f32 = 0.2;
/// Minimum offset collar in seconds
pub const OFFSET_COLLAR: f32 = 0.2;
/// Offset collar as a fraction of the reference event duration
pub const OFFSET_COLLAR_RATE: f32 = 0.2;

/// One timed event attributed to a clip
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    /// Clip filename
    pub filename: String,
    /// Class label
    pub label: String,
    /// Start in seconds
    pub onset: f32,
    /// End in seconds
    pub offset: f32,
}

/// Event-based scores over a full class vocabulary
#[derive(Debug, Clone)]
pub struct EventBasedMetrics {
    /// Per-class counts, in vocabulary order
    pub classes: Vec<ClassMetrics>,
}

impl EventBasedMetrics {
    /// Unweighted mean F1 over the vocabulary
    pub fn macro_f1(&self) -> f64 {
        macro_f1(&self.classes)
    }
}

fn matches(reference: &TimedEvent, prediction: &TimedEvent) -> bool {
    let duration = (reference.offset - reference.onset).max(0.0);
    let offset_collar = OFFSET_COLLAR.max(OFFSET_COLLAR_RATE * duration);
    (prediction.onset - reference.onset).abs() <= ONSET_COLLAR
        && (prediction.offset - reference.offset).abs() <= offset_collar
}

/// Score predictions against references with collar-based event matching.
///
/// Every class in `classes` gets an entry even when it never occurs, so
/// the macro average always runs over the full vocabulary. Events with
/// labels outside the vocabulary are ignored.
pub fn event_based_f1(
    references: &[TimedEvent],
    predictions: &[TimedEvent],
    classes: &[String],
) -> EventBasedMetrics {
    let mut per_class: Vec<ClassMetrics> =
        classes.iter().map(|label| ClassMetrics::new(label)).collect();

    // Group both sides by (clip, class)
    let mut grouped_refs: HashMap<(&str, &str), Vec<&TimedEvent>> = HashMap::new();
    for event in references {
        grouped_refs
            .entry((event.filename.as_str(), event.label.as_str()))
            .or_default()
            .push(event);
    }
    let mut grouped_preds: HashMap<(&str, &str), Vec<&TimedEvent>> = HashMap::new();
    for event in predictions {
        grouped_preds
            .entry((event.filename.as_str(), event.label.as_str()))
            .or_default()
            .push(event);
    }

    for (class_index, label) in classes.iter().enumerate() {
        let counts = &mut per_class[class_index];
        let clips: std::collections::BTreeSet<&str> = grouped_refs
            .keys()
            .chain(grouped_preds.keys())
            .filter(|(_, l)| *l == label.as_str())
            .map(|(clip, _)| *clip)
            .collect();

        for clip in clips {
            let key = (clip, label.as_str());
            let refs = grouped_refs.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            let preds = grouped_preds.get(&key).map(Vec::as_slice).unwrap_or(&[]);

            let mut claimed = vec![false; preds.len()];
            for reference in refs {
                let matched = preds.iter().enumerate().find(|(i, prediction)| {
                    !claimed[*i] && matches(reference, prediction)
                });
                match matched {
                    Some((i, _)) => {
                        claimed[i] = true;
                        counts.true_positives += 1;
                    }
                    None => counts.false_negatives += 1,
                }
            }
            counts.false_positives += claimed.iter().filter(|&&c| !c).count();
        }
    }

    EventBasedMetrics { classes: per_class }
}
