//! Log-mel spectrogram extraction
//!
//! STFT (Hann window) followed by a triangular mel filterbank and log
//! compression. Parameters come from [`EvalConfig`](crate::config::EvalConfig);
//! the defaults reproduce the features the model was trained on.

use std::sync::Arc;

use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::EvalError;

/// Numerical stability epsilon for the log
const LOG_EPSILON: f32 = 1e-10;

/// Convert Hz to mel (HTK formula)
fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert mel to Hz (HTK formula)
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Log-mel spectrogram extractor
///
/// The FFT plan and the filterbank are built once and shared; `extract`
/// takes `&self` and is safe to call from rayon workers.
pub struct MelExtractor {
    sample_rate: u32,
    n_window: usize,
    hop_length: usize,
    n_mels: usize,
    window: Vec<f32>,
    /// Triangular filter weights, `[n_mels][n_window / 2 + 1]`
    filterbank: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for MelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelExtractor")
            .field("sample_rate", &self.sample_rate)
            .field("n_window", &self.n_window)
            .field("hop_length", &self.hop_length)
            .field("n_mels", &self.n_mels)
            .finish()
    }
}

impl MelExtractor {
    /// Create an extractor for the given parameters
    ///
    /// # Errors
    ///
    /// Returns `EvalError::InvalidInput` for zero-sized parameters or a
    /// filterbank range outside `(0, sample_rate / 2]`.
    pub fn new(
        sample_rate: u32,
        n_window: usize,
        hop_length: usize,
        n_mels: usize,
        f_min: f32,
        f_max: f32,
    ) -> Result<Self, EvalError> {
        if sample_rate == 0 || n_window == 0 || hop_length == 0 || n_mels == 0 {
            return Err(EvalError::InvalidInput(
                "sample_rate, n_window, hop_length and n_mels must be > 0".to_string(),
            ));
        }
        if f_min < 0.0 || f_max <= f_min || f_max > sample_rate as f32 / 2.0 {
            return Err(EvalError::InvalidInput(format!(
                "invalid mel range [{}, {}] for sample rate {}",
                f_min, f_max, sample_rate
            )));
        }

        // Periodic Hann window
        let window: Vec<f32> = (0..n_window)
            .map(|n| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / n_window as f32).cos()
            })
            .collect();

        let filterbank = build_filterbank(sample_rate, n_window, n_mels, f_min, f_max);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_window);

        Ok(Self {
            sample_rate,
            n_window,
            hop_length,
            n_mels,
            window,
            filterbank,
            fft,
        })
    }

    /// Number of mel bands
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Number of STFT frames produced for a signal of `n_samples` samples
    pub fn n_frames(&self, n_samples: usize) -> usize {
        if n_samples < self.n_window {
            1
        } else {
            1 + (n_samples - self.n_window) / self.hop_length
        }
    }

    /// Extract a log-mel spectrogram, `[frames, n_mels]`
    ///
    /// # Errors
    ///
    /// Returns `EvalError::InvalidInput` for an empty signal.
    pub fn extract(&self, samples: &[f32]) -> Result<Array2<f32>, EvalError> {
        if samples.is_empty() {
            return Err(EvalError::InvalidInput(
                "empty audio signal".to_string(),
            ));
        }

        let n_frames = self.n_frames(samples.len());
        let n_bins = self.n_window / 2 + 1;
        log::debug!(
            "Extracting log-mel features: {} samples -> {} frames x {} mels",
            samples.len(),
            n_frames,
            self.n_mels
        );

        let mut features = Array2::zeros((n_frames, self.n_mels));
        let mut buffer = vec![Complex::new(0.0f32, 0.0f32); self.n_window];
        let mut power = vec![0.0f32; n_bins];

        for frame in 0..n_frames {
            let start = frame * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = samples.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);

            for (k, p) in power.iter_mut().enumerate() {
                *p = buffer[k].norm_sqr();
            }

            for (m, filter) in self.filterbank.iter().enumerate() {
                let energy: f32 = filter
                    .iter()
                    .zip(power.iter())
                    .map(|(w, p)| w * p)
                    .sum();
                features[[frame, m]] = (energy + LOG_EPSILON).ln();
            }
        }

        Ok(features)
    }
}

/// Build a triangular mel filterbank, `[n_mels][n_window / 2 + 1]`
fn build_filterbank(
    sample_rate: u32,
    n_window: usize,
    n_mels: usize,
    f_min: f32,
    f_max: f32,
) -> Vec<Vec<f32>> {
    let n_bins = n_window / 2 + 1;
    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);

    // n_mels + 2 edge frequencies, equally spaced on the mel scale
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let bin_hz = sample_rate as f32 / n_window as f32;

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..n_bins)
                .map(|k| {
                    let freq = k as f32 * bin_hz;
                    let rising = if center > lower {
                        (freq - lower) / (center - lower)
                    } else {
                        0.0
                    };
                    let falling = if upper > center {
                        (upper - freq) / (upper - center)
                    } else {
                        0.0
                    };
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Pad with zero-frames or truncate a feature matrix to exactly `max_frames` rows
pub fn pad_or_truncate(features: &Array2<f32>, max_frames: usize) -> Array2<f32> {
    let (n_frames, n_mels) = features.dim();
    let mut out = Array2::zeros((max_frames, n_mels));
    let copy = n_frames.min(max_frames);
    out.slice_mut(ndarray::s![..copy, ..])
        .assign(&features.slice(ndarray::s![..copy, ..]));
    out
}
