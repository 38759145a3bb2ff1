//! Evaluation configuration
//!
//! Mirrors the constants the training pipeline was run with: dataset paths,
//! feature-extraction parameters, and evaluation parameters. The defaults
//! match the DCASE 2019 task-4 setup (44.1 kHz audio, 2048-sample window,
//! hop 511, 64 mel bands, 10 s clips).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EvalError;

/// One evaluated dataset split: a name, a metadata file and an audio directory.
#[derive(Debug, Clone)]
pub struct SplitSpec {
    /// Split name used in logs and reports (e.g. "eval_dcase2018")
    pub name: String,

    /// Metadata file, resolved against the workspace root
    pub metadata: PathBuf,

    /// Directory containing the split's audio clips, resolved against the workspace root
    pub audio_dir: PathBuf,
}

/// Evaluation configuration parameters
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Workspace root; dataset paths below are relative to it
    pub workspace: PathBuf,

    /// Metadata file for the DCASE 2018 evaluation split
    pub eval2018_metadata: PathBuf,

    /// Metadata file for the DCASE 2019 validation split
    pub validation_metadata: PathBuf,

    /// Audio directory shared by both evaluated splits
    pub audio_dir: PathBuf,

    /// Root of the per-configuration feature cache directories
    pub feature_dir: PathBuf,

    // Feature extraction
    /// Sample rate in Hz (default: 44100)
    pub sample_rate: u32,

    /// STFT window size in samples (default: 2048)
    pub n_window: usize,

    /// STFT hop length in samples (default: 511)
    pub hop_length: usize,

    /// Number of mel bands (default: 64)
    pub n_mels: usize,

    /// Lowest mel filterbank frequency in Hz (default: 0.0)
    pub f_min: f32,

    /// Highest mel filterbank frequency in Hz (default: 22050.0)
    pub f_max: f32,

    /// Maximum clip duration in seconds; features are padded/truncated to
    /// `max_frames()` (default: 10.0)
    pub max_len_seconds: f32,

    /// Write extracted features back to the cache directory (default: false)
    pub save_log_feature: bool,

    // Evaluation
    /// Batch size for the weak (clip-level) metric pass (default: 24)
    pub batch_size: usize,

    /// Median filter window applied to binarized frame activations, in
    /// output frames; must be odd (default: 5)
    pub median_window: usize,

    /// Decision threshold on class probabilities (default: 0.5)
    pub decision_threshold: f32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from(".."),
            eval2018_metadata: PathBuf::from("dataset/metadata/validation/eval_dcase2018.csv"),
            validation_metadata: PathBuf::from("dataset/metadata/validation/validation.csv"),
            audio_dir: PathBuf::from("dataset/audio/validation"),
            feature_dir: PathBuf::from("dataset/features"),
            sample_rate: 44100,
            n_window: 2048,
            hop_length: 511,
            n_mels: 64,
            f_min: 0.0,
            f_max: 22050.0,
            max_len_seconds: 10.0,
            save_log_feature: false,
            batch_size: 24,
            median_window: 5,
            decision_threshold: 0.5,
        }
    }
}

impl EvalConfig {
    /// Maximum number of input frames per clip:
    /// `ceil(max_len_seconds * sample_rate / hop_length)`
    pub fn max_frames(&self) -> usize {
        (self.max_len_seconds * self.sample_rate as f32 / self.hop_length as f32).ceil() as usize
    }

    /// Duration of one input frame in seconds
    pub fn frame_duration(&self) -> f32 {
        self.hop_length as f32 / self.sample_rate as f32
    }

    /// Name of the feature cache subdirectory for this configuration,
    /// e.g. `sr44100_win2048_hop511_mels64`
    pub fn feature_subdir(&self) -> String {
        format!(
            "sr{}_win{}_hop{}_mels{}",
            self.sample_rate, self.n_window, self.hop_length, self.n_mels
        )
    }

    /// Absolute feature cache directory for this configuration
    pub fn feature_cache_dir(&self) -> PathBuf {
        self.workspace
            .join(&self.feature_dir)
            .join(self.feature_subdir())
    }

    /// The two evaluated splits, in evaluation order (2018 eval first,
    /// then 2019 validation)
    pub fn splits(&self) -> Vec<SplitSpec> {
        vec![
            SplitSpec {
                name: "eval_dcase2018".to_string(),
                metadata: self.workspace.join(&self.eval2018_metadata),
                audio_dir: self.workspace.join(&self.audio_dir),
            },
            SplitSpec {
                name: "validation".to_string(),
                metadata: self.workspace.join(&self.validation_metadata),
                audio_dir: self.workspace.join(&self.audio_dir),
            },
        ]
    }
}

/// Derive the class vocabulary from a strong-label metadata file:
/// the sorted, deduplicated set of non-empty `event_label` values.
///
/// This is how the training configuration derived its class list; the
/// evaluation itself trusts the vocabulary stored in the checkpoint's
/// encoder state, so this is only needed when building checkpoints or
/// inspecting datasets.
///
/// # Errors
///
/// Returns `EvalError::Dataset` if the file cannot be read or has no
/// `event_label` column.
pub fn classes_from_metadata(path: &Path) -> Result<Vec<String>, EvalError> {
    let content = fs::read_to_string(path)
        .map_err(|e| EvalError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;

    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| EvalError::Dataset(format!("{} is empty", path.display())))?;

    let label_col = header
        .split('\t')
        .position(|c| c.trim() == "event_label")
        .ok_or_else(|| {
            EvalError::Dataset(format!("{} has no event_label column", path.display()))
        })?;

    let mut labels = BTreeSet::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(label) = line.split('\t').nth(label_col) {
            let label = label.trim();
            if !label.is_empty() {
                labels.insert(label.to_string());
            }
        }
    }

    Ok(labels.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_frames_default() {
        let config = EvalConfig::default();
        // ceil(10.0 * 44100 / 511) = 864
        assert_eq!(config.max_frames(), 864);
    }

    #[test]
    fn test_feature_subdir() {
        let config = EvalConfig::default();
        assert_eq!(config.feature_subdir(), "sr44100_win2048_hop511_mels64");
    }

    #[test]
    fn test_splits_order() {
        let config = EvalConfig::default();
        let splits = config.splits();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].name, "eval_dcase2018");
        assert_eq!(splits[1].name, "validation");
    }

    #[test]
    fn test_classes_from_metadata() {
        let dir = std::env::temp_dir().join(format!("sed_eval_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("validation.csv");
        std::fs::write(
            &path,
            "filename\tonset\toffset\tevent_label\n\
             a.wav\t0.0\t1.0\tDog\n\
             b.wav\t0.5\t2.0\tAlarm\n\
             c.wav\t1.0\t3.0\tDog\n\
             d.wav\t\t\t\n",
        )
        .unwrap();

        let classes = classes_from_metadata(&path).unwrap();
        assert_eq!(classes, vec!["Alarm".to_string(), "Dog".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_classes_from_missing_file() {
        let result = classes_from_metadata(Path::new("/nonexistent/validation.csv"));
        assert!(result.is_err());
    }
}
