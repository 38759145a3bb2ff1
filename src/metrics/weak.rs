//! Clip-level scoring of weak predictions
//!
//! Probabilities are binarized at the decision threshold and compared
//! against many-hot clip targets, accumulating per-class counts.

use crate::metrics::ClassMetrics;

/// Score clip-level probabilities against many-hot targets.
///
/// `targets` and `probabilities` are parallel per-clip vectors of length
/// `classes.len()`. Clips whose vectors do not match the vocabulary size
/// are skipped with a warning.
pub fn f_measure_by_class(
    targets: &[Vec<f32>],
    probabilities: &[Vec<f32>],
    classes: &[String],
    threshold: f32,
) -> Vec<ClassMetrics> {
    let mut per_class: Vec<ClassMetrics> =
        classes.iter().map(|label| ClassMetrics::new(label)).collect();

    for (target, probability) in targets.iter().zip(probabilities) {
        if target.len() != classes.len() || probability.len() != classes.len() {
            log::warn!(
                "Skipping clip with {} targets and {} probabilities for {} classes",
                target.len(),
                probability.len(),
                classes.len()
            );
            continue;
        }
        for (class, counts) in per_class.iter_mut().enumerate() {
            let actual = target[class] >= 0.5;
            let predicted = probability[class] > threshold;
            match (actual, predicted) {
                (true, true) => counts.true_positives += 1,
                (false, true) => counts.false_positives += 1,
                (true, false) => counts.false_negatives += 1,
                (false, false) => {}
            }
        }
    }
    per_class
}
