//! Evaluation metrics
//!
//! Strong labels are scored with event-based F1 under onset/offset collars;
//! weak labels with clip-level F1 at a fixed decision threshold. Both
//! report per-class counts and a macro average over the class vocabulary.

pub mod strong;
pub mod weak;

pub use strong::{event_based_f1, EventBasedMetrics, TimedEvent};
pub use weak::f_measure_by_class;

/// Per-class detection counts with derived scores
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    /// Class label
    pub label: String,
    /// Correctly detected instances
    pub true_positives: usize,
    /// Spurious detections
    pub false_positives: usize,
    /// Missed instances
    pub false_negatives: usize,
}

impl ClassMetrics {
    /// New zeroed counts for a class
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            true_positives: 0,
            false_positives: 0,
            false_negatives: 0,
        }
    }

    /// Precision, 0.0 when nothing was detected
    pub fn precision(&self) -> f64 {
        let detected = self.true_positives + self.false_positives;
        if detected == 0 {
            0.0
        } else {
            self.true_positives as f64 / detected as f64
        }
    }

    /// Recall, 0.0 when there was nothing to detect
    pub fn recall(&self) -> f64 {
        let actual = self.true_positives + self.false_negatives;
        if actual == 0 {
            0.0
        } else {
            self.true_positives as f64 / actual as f64
        }
    }

    /// F1 score, 0.0 when there is neither detection nor reference
    pub fn f1(&self) -> f64 {
        let denominator =
            2 * self.true_positives + self.false_positives + self.false_negatives;
        if denominator == 0 {
            0.0
        } else {
            2.0 * self.true_positives as f64 / denominator as f64
        }
    }
}

/// Unweighted mean F1 over all classes
pub fn macro_f1(classes: &[ClassMetrics]) -> f64 {
    if classes.is_empty() {
        return 0.0;
    }
    classes.iter().map(ClassMetrics::f1).sum::<f64>() / classes.len() as f64
}

/// Multi-line per-class score table for logging
pub fn format_class_table(classes: &[ClassMetrics]) -> String {
    let width = classes
        .iter()
        .map(|c| c.label.len())
        .max()
        .unwrap_or(0)
        .max("class".len());
    let mut table = format!("{:width$}  {:>9}  {:>9}  {:>9}\n", "class", "precision", "recall", "f1");
    for class in classes {
        table.push_str(&format!(
            "{:width$}  {:>9.3}  {:>9.3}  {:>9.3}\n",
            class.label,
            class.precision(),
            class.recall(),
            class.f1()
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_metrics_scores() {
        let metrics = ClassMetrics {
            label: "Dog".to_string(),
            true_positives: 3,
            false_positives: 1,
            false_negatives: 2,
        };
        assert!((metrics.precision() - 0.75).abs() < 1e-12);
        assert!((metrics.recall() - 0.6).abs() < 1e-12);
        assert!((metrics.f1() - 2.0 * 3.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_class_is_zero_not_nan() {
        let metrics = ClassMetrics::new("Cat");
        assert_eq!(metrics.precision(), 0.0);
        assert_eq!(metrics.recall(), 0.0);
        assert_eq!(metrics.f1(), 0.0);
    }

    #[test]
    fn test_macro_f1_averages_all_classes() {
        let perfect = ClassMetrics {
            label: "Dog".to_string(),
            true_positives: 2,
            false_positives: 0,
            false_negatives: 0,
        };
        let empty = ClassMetrics::new("Cat");
        assert!((macro_f1(&[perfect, empty]) - 0.5).abs() < 1e-12);
        assert_eq!(macro_f1(&[]), 0.0);
    }

    #[test]
    fn test_format_class_table_has_one_row_per_class() {
        let table = format_class_table(&[ClassMetrics::new("Dog"), ClassMetrics::new("Alarm")]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("Alarm"));
    }
}
