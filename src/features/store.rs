//! Feature file location and caching
//!
//! The dataset indexer refers to clips by WAV filename; the store resolves
//! each to a cached log-mel feature file under the per-configuration
//! feature directory, extracting (and optionally writing back) when the
//! cache entry is missing.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::features::mel::{pad_or_truncate, MelExtractor};

/// On-disk form of one clip's features
#[derive(Debug, Serialize, Deserialize)]
struct CachedFeatures {
    n_frames: usize,
    n_mels: usize,
    data: Vec<f32>,
}

/// Locates, extracts and caches per-clip log-mel features
#[derive(Debug)]
pub struct FeatureStore {
    audio_dir: PathBuf,
    cache_dir: PathBuf,
    extractor: MelExtractor,
    expected_sample_rate: u32,
    max_frames: usize,
    save_features: bool,
}

impl FeatureStore {
    /// Create a store for one split's audio directory
    ///
    /// # Errors
    ///
    /// Returns `EvalError::InvalidInput` if the feature parameters are
    /// invalid, `EvalError::Io` if the cache directory cannot be created
    /// while `save_log_feature` is set.
    pub fn new(config: &EvalConfig, audio_dir: &Path) -> Result<Self, EvalError> {
        let extractor = MelExtractor::new(
            config.sample_rate,
            config.n_window,
            config.hop_length,
            config.n_mels,
            config.f_min,
            config.f_max,
        )?;
        let cache_dir = config.feature_cache_dir();
        if config.save_log_feature {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self {
            audio_dir: audio_dir.to_path_buf(),
            cache_dir,
            extractor,
            expected_sample_rate: config.sample_rate,
            max_frames: config.max_frames(),
            save_features: config.save_log_feature,
        })
    }

    /// Number of frames every returned feature matrix has
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Cache file path for a clip filename
    pub fn feature_path(&self, filename: &str) -> PathBuf {
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        self.cache_dir.join(format!("{}.json", stem))
    }

    /// Load one clip's features, `[max_frames, n_mels]`.
    ///
    /// Cache hit: read the cached file. Miss: decode the WAV, extract,
    /// pad/truncate, and write the cache entry when the store was built
    /// with `save_log_feature`.
    pub fn load(&self, filename: &str) -> Result<Array2<f32>, EvalError> {
        let cache_path = self.feature_path(filename);
        if cache_path.is_file() {
            return self.read_cached(&cache_path);
        }

        let wav_path = self.audio_dir.join(filename);
        let samples = self.decode_wav(&wav_path)?;
        let features = self.extractor.extract(&samples)?;
        let features = pad_or_truncate(&features, self.max_frames);

        if self.save_features {
            self.write_cached(&cache_path, &features)?;
        }
        Ok(features)
    }

    /// Load many clips in parallel, preserving input order
    pub fn load_many(&self, filenames: &[String]) -> Result<Vec<Array2<f32>>, EvalError> {
        filenames
            .par_iter()
            .map(|filename| self.load(filename))
            .collect()
    }

    fn read_cached(&self, path: &Path) -> Result<Array2<f32>, EvalError> {
        let content = fs::read_to_string(path)
            .map_err(|e| EvalError::Feature(format!("cannot read {}: {}", path.display(), e)))?;
        let cached: CachedFeatures = serde_json::from_str(&content).map_err(|e| {
            EvalError::Feature(format!("malformed feature cache {}: {}", path.display(), e))
        })?;
        let features =
            Array2::from_shape_vec((cached.n_frames, cached.n_mels), cached.data).map_err(
                |e| EvalError::Feature(format!("inconsistent cache {}: {}", path.display(), e)),
            )?;
        Ok(pad_or_truncate(&features, self.max_frames))
    }

    fn write_cached(&self, path: &Path, features: &Array2<f32>) -> Result<(), EvalError> {
        let (n_frames, n_mels) = features.dim();
        let cached = CachedFeatures {
            n_frames,
            n_mels,
            data: features.iter().copied().collect(),
        };
        let content = serde_json::to_string(&cached)
            .map_err(|e| EvalError::Feature(format!("cache serialization failed: {}", e)))?;
        fs::write(path, content)?;
        log::debug!("Cached features at {}", path.display());
        Ok(())
    }

    /// Decode a WAV file to mono f32 samples, averaging channels
    fn decode_wav(&self, path: &Path) -> Result<Vec<f32>, EvalError> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| EvalError::Feature(format!("cannot open {}: {}", path.display(), e)))?;
        let spec = reader.spec();
        if spec.sample_rate != self.expected_sample_rate {
            log::warn!(
                "{}: sample rate {} differs from configured {}",
                path.display(),
                spec.sample_rate,
                self.expected_sample_rate
            );
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EvalError::Feature(format!("{}: {}", path.display(), e)))?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_value))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| EvalError::Feature(format!("{}: {}", path.display(), e)))?
            }
        };

        let channels = spec.channels as usize;
        if channels <= 1 {
            return Ok(samples);
        }
        Ok(samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect())
    }
}
