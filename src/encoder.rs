//! Many-hot label encoding
//!
//! Maps between the fixed class vocabulary and multi-label representations:
//! frame-level many-hot matrices for strongly labeled clips, clip-level
//! many-hot vectors for weakly labeled clips, and back from binary frame
//! activations to contiguous labeled segments.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Fitted encoder state as stored in checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderState {
    /// Ordered class vocabulary
    pub labels: Vec<String>,
    /// Number of input frames per clip the encoder was fitted with
    pub n_frames: usize,
}

/// A labeled segment in output-frame units, produced by strong decoding.
/// The range is half-open: `[onset_frame, offset_frame)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    /// Class label
    pub label: String,
    /// First active frame
    pub onset_frame: usize,
    /// One past the last active frame
    pub offset_frame: usize,
}

/// Many-hot encoder over a fixed, ordered class vocabulary
#[derive(Debug, Clone)]
pub struct ManyHotEncoder {
    labels: Vec<String>,
    n_frames: usize,
}

impl ManyHotEncoder {
    /// Reconstruct an encoder from its saved state
    pub fn from_state(state: &EncoderState) -> Self {
        Self {
            labels: state.labels.clone(),
            n_frames: state.n_frames,
        }
    }

    /// Saved-state form of this encoder
    pub fn state(&self) -> EncoderState {
        EncoderState {
            labels: self.labels.clone(),
            n_frames: self.n_frames,
        }
    }

    /// The ordered class vocabulary
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    /// Number of input frames per encoded clip
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Index of a label in the vocabulary, if present
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Encode timed events into a frame-level many-hot matrix
    /// `[n_frames, n_classes]`.
    ///
    /// `frame_duration` is the duration of one input frame in seconds.
    /// Events with labels outside the vocabulary are skipped with a warning;
    /// events extending past the clip end are clipped to it.
    pub fn encode_strong(
        &self,
        events: &[(String, f32, f32)],
        frame_duration: f32,
    ) -> Array2<f32> {
        let mut target = Array2::zeros((self.n_frames, self.labels.len()));
        for (label, onset, offset) in events {
            let Some(class) = self.label_index(label) else {
                log::warn!("Skipping event with unknown label: {}", label);
                continue;
            };
            let onset_frame = (onset / frame_duration).floor().max(0.0) as usize;
            let offset_frame = ((offset / frame_duration).ceil() as usize).min(self.n_frames);
            for frame in onset_frame..offset_frame {
                target[[frame, class]] = 1.0;
            }
        }
        target
    }

    /// Encode clip-level labels into a many-hot vector of length `n_classes`
    pub fn encode_weak(&self, labels: &[String]) -> Vec<f32> {
        let mut target = vec![0.0; self.labels.len()];
        for label in labels {
            match self.label_index(label) {
                Some(class) => target[class] = 1.0,
                None => log::warn!("Skipping unknown weak label: {}", label),
            }
        }
        target
    }

    /// Decode a binary frame activation matrix `[frames, n_classes]` back
    /// into contiguous labeled segments (frame units, per class).
    ///
    /// A value >= 0.5 counts as active; callers binarize and median-filter
    /// before decoding.
    pub fn decode_strong(&self, activations: &Array2<f32>) -> Vec<DecodedSegment> {
        let (n_frames, n_classes) = activations.dim();
        let n_classes = n_classes.min(self.labels.len());

        let mut segments = Vec::new();
        for class in 0..n_classes {
            let mut onset = None;
            for frame in 0..n_frames {
                let active = activations[[frame, class]] >= 0.5;
                match (active, onset) {
                    (true, None) => onset = Some(frame),
                    (false, Some(start)) => {
                        segments.push(DecodedSegment {
                            label: self.labels[class].clone(),
                            onset_frame: start,
                            offset_frame: frame,
                        });
                        onset = None;
                    }
                    _ => {}
                }
            }
            if let Some(start) = onset {
                segments.push(DecodedSegment {
                    label: self.labels[class].clone(),
                    onset_frame: start,
                    offset_frame: n_frames,
                });
            }
        }
        segments
    }
}
