//! Data views over an indexed split
//!
//! A view pairs the dataset index with the feature store, the fitted
//! scaler and one label encoding. The strong and weak views of a split
//! share the same store and scaler, so the model sees identical inputs on
//! both passes.

use ndarray::Array2;

use crate::dataset::index::DatasetIndex;
use crate::encoder::ManyHotEncoder;
use crate::error::EvalError;
use crate::features::FeatureStore;
use crate::preprocessing::Scaler;

/// Label granularity of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelEncoding {
    /// Frame-level many-hot targets
    Strong,
    /// Clip-level many-hot targets
    Weak,
}

/// One loaded clip: standardized features plus targets in the view's encoding
#[derive(Debug, Clone)]
pub struct ClipSample {
    /// Clip filename
    pub filename: String,
    /// Standardized log-mel features, `[max_frames, n_mels]`
    pub features: Array2<f32>,
    /// Frame-level targets, `[n_frames, n_classes]` (strong views only)
    pub strong_target: Option<Array2<f32>>,
    /// Clip-level targets, length `n_classes` (weak views only)
    pub weak_target: Option<Vec<f32>>,
}

/// Iterable view over one split with a fixed label encoding
pub struct DataView<'a> {
    index: &'a DatasetIndex,
    store: &'a FeatureStore,
    scaler: &'a Scaler,
    encoder: &'a ManyHotEncoder,
    encoding: LabelEncoding,
    frame_duration: f32,
    filenames: Vec<String>,
}

impl<'a> DataView<'a> {
    /// Create a view; `frame_duration` is the input frame duration in seconds
    pub fn new(
        index: &'a DatasetIndex,
        store: &'a FeatureStore,
        scaler: &'a Scaler,
        encoder: &'a ManyHotEncoder,
        encoding: LabelEncoding,
        frame_duration: f32,
    ) -> Self {
        let filenames = index.filenames();
        Self {
            index,
            store,
            scaler,
            encoder,
            encoding,
            frame_duration,
            filenames,
        }
    }

    /// Unique clip filenames in index order
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Number of clips in the view
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    /// True when the view has no clips
    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// Load one clip: features standardized, targets in this view's encoding
    pub fn load_clip(&self, filename: &str) -> Result<ClipSample, EvalError> {
        let mut features = self.store.load(filename)?;
        self.scaler.transform(&mut features)?;

        let (strong_target, weak_target) = match self.encoding {
            LabelEncoding::Strong => {
                let events = self.index.events_for(filename);
                (
                    Some(self.encoder.encode_strong(&events, self.frame_duration)),
                    None,
                )
            }
            LabelEncoding::Weak => {
                let labels = self.index.weak_labels_for(filename);
                (None, Some(self.encoder.encode_weak(&labels)))
            }
        };

        Ok(ClipSample {
            filename: filename.to_string(),
            features,
            strong_target,
            weak_target,
        })
    }

    /// Clip filenames grouped into batches of at most `batch_size`
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = &[String]> {
        let batch_size = batch_size.max(1);
        self.filenames.chunks(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::encoder::EncoderState;
    use crate::preprocessing::ScalerState;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sed_eval_view_{}", std::process::id()));
        fs::create_dir_all(dir.join("audio")).unwrap();
        dir
    }

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..16000 {
            let v = (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 16000.0).sin();
            writer.write_sample((v * 8000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_strong_and_weak_views_share_features() {
        let dir = temp_dir();
        let audio_dir = dir.join("audio");
        write_wav(&audio_dir.join("a.wav"));

        let metadata = dir.join("meta.csv");
        fs::write(
            &metadata,
            "filename\tonset\toffset\tevent_label\na.wav\t0.1\t0.4\tDog\n",
        )
        .unwrap();

        let config = EvalConfig {
            workspace: dir.clone(),
            sample_rate: 16000,
            n_window: 256,
            hop_length: 128,
            n_mels: 8,
            f_max: 8000.0,
            max_len_seconds: 1.0,
            ..EvalConfig::default()
        };
        let index = DatasetIndex::from_metadata(&metadata, None).unwrap();
        let store = FeatureStore::new(&config, &audio_dir).unwrap();
        let scaler = Scaler::from_state(&ScalerState {
            mean: vec![0.0; 8],
            std: vec![1.0; 8],
        })
        .unwrap();
        let encoder = ManyHotEncoder::from_state(&EncoderState {
            labels: vec!["Alarm".to_string(), "Dog".to_string()],
            n_frames: config.max_frames(),
        });

        let strong = DataView::new(
            &index,
            &store,
            &scaler,
            &encoder,
            LabelEncoding::Strong,
            config.frame_duration(),
        );
        let weak = DataView::new(
            &index,
            &store,
            &scaler,
            &encoder,
            LabelEncoding::Weak,
            config.frame_duration(),
        );

        let s = strong.load_clip("a.wav").unwrap();
        let w = weak.load_clip("a.wav").unwrap();
        assert_eq!(s.features, w.features);

        let target = s.strong_target.unwrap();
        assert_eq!(target.dim(), (config.max_frames(), 2));
        assert!(target.column(1).sum() > 0.0);
        assert_eq!(target.column(0).sum(), 0.0);

        assert_eq!(w.weak_target.unwrap(), vec![0.0, 1.0]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_batches() {
        let dir = temp_dir();
        let metadata = dir.join("batch_meta.csv");
        fs::write(
            &metadata,
            "filename\tonset\toffset\tevent_label\n\
             a.wav\t0.0\t0.1\tDog\nb.wav\t0.0\t0.1\tDog\nc.wav\t0.0\t0.1\tDog\n",
        )
        .unwrap();

        let config = EvalConfig {
            workspace: dir.clone(),
            sample_rate: 16000,
            n_window: 256,
            hop_length: 128,
            n_mels: 8,
            f_max: 8000.0,
            max_len_seconds: 1.0,
            ..EvalConfig::default()
        };
        let index = DatasetIndex::from_metadata(&metadata, None).unwrap();
        let store = FeatureStore::new(&config, &dir.join("audio")).unwrap();
        let scaler = Scaler::from_state(&ScalerState {
            mean: vec![0.0; 8],
            std: vec![1.0; 8],
        })
        .unwrap();
        let encoder = ManyHotEncoder::from_state(&EncoderState {
            labels: vec!["Dog".to_string()],
            n_frames: config.max_frames(),
        });
        let view = DataView::new(
            &index,
            &store,
            &scaler,
            &encoder,
            LabelEncoding::Weak,
            config.frame_duration(),
        );

        let batches: Vec<_> = view.batches(2).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }
}
