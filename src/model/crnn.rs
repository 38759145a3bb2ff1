//! CRNN reconstruction and forward pass
//!
//! The model is a stack of convolutional blocks (conv → batch norm → GLU
//! gate or ReLU → average pooling) followed by a stacked bidirectional GRU
//! and a sigmoid dense head. The strong output is one probability per
//! output frame and class; the weak output pools the strong output over
//! time, attention-weighted when the attention head was trained.
//!
//! All hyperparameters and weights come from the checkpoint; construction
//! validates every tensor shape so a mismatched checkpoint fails up front
//! rather than mid-forward.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Tensor;
use crate::error::EvalError;
use crate::model::layers::{
    avg_pool2d, batch_norm, conv2d, glu_gate, linear, relu, sigmoid, BiGru, GruDirection,
};

/// Attention softmax clamp bounds
const ATTENTION_CLAMP_MIN: f32 = 1e-7;
const ATTENTION_CLAMP_MAX: f32 = 1.0;

/// Saved model hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrnnConfig {
    /// Input channels (always 1 for mono log-mel features)
    pub n_in_channel: usize,
    /// Number of classes
    pub nclass: usize,
    /// Whether the attention head is present
    pub attention: bool,
    /// GRU hidden size
    pub n_rnn_cell: usize,
    /// Number of stacked bidirectional GRU layers
    pub n_layers_rnn: usize,
    /// Conv block activation: "glu" or "relu"
    pub activation: String,
    /// Dropout rate used in training; inert at evaluation
    pub dropout: f32,
    /// Kernel size per conv block
    pub kernel_size: Vec<usize>,
    /// Zero padding per conv block
    pub padding: Vec<usize>,
    /// Stride per conv block
    pub stride: Vec<usize>,
    /// Output channels per conv block
    pub nb_filters: Vec<usize>,
    /// Average pooling window per conv block, (time, frequency)
    pub pooling: Vec<(usize, usize)>,
}

/// Saved weights of one conv block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvBlockWeights {
    /// Convolution kernel, `[out, in, k, k]`
    pub conv_w: Tensor,
    /// Convolution bias, `[out]`
    pub conv_b: Tensor,
    /// Batch norm scale, `[out]`
    pub bn_gamma: Tensor,
    /// Batch norm shift, `[out]`
    pub bn_beta: Tensor,
    /// Batch norm running mean, `[out]`
    pub bn_mean: Tensor,
    /// Batch norm running variance, `[out]`
    pub bn_var: Tensor,
    /// GLU gate weight, `[out, out]` (present when activation is "glu")
    pub gate_w: Option<Tensor>,
    /// GLU gate bias, `[out]`
    pub gate_b: Option<Tensor>,
}

/// Saved weights of one GRU direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruDirectionWeights {
    /// Input weights, `[3 * hidden, input]`
    pub w_ih: Tensor,
    /// Recurrent weights, `[3 * hidden, hidden]`
    pub w_hh: Tensor,
    /// Input bias, `[3 * hidden]`
    pub b_ih: Tensor,
    /// Recurrent bias, `[3 * hidden]`
    pub b_hh: Tensor,
}

/// Saved weights of one bidirectional GRU layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruLayerWeights {
    /// Forward direction
    pub forward: GruDirectionWeights,
    /// Backward direction
    pub backward: GruDirectionWeights,
}

/// The full saved state dict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrnnWeights {
    /// Conv blocks, in order
    pub blocks: Vec<ConvBlockWeights>,
    /// GRU layers, in order
    pub gru: Vec<GruLayerWeights>,
    /// Strong head weight, `[nclass, 2 * hidden]`
    pub dense_w: Tensor,
    /// Strong head bias, `[nclass]`
    pub dense_b: Tensor,
    /// Attention head weight, `[nclass, 2 * hidden]` (when attention is on)
    pub attention_w: Option<Tensor>,
    /// Attention head bias, `[nclass]`
    pub attention_b: Option<Tensor>,
}

/// One forward pass result
#[derive(Debug, Clone)]
pub struct CrnnOutput {
    /// Frame-level class probabilities, `[output_frames, nclass]`
    pub strong: Array2<f32>,
    /// Clip-level class probabilities, length `nclass`
    pub weak: Vec<f32>,
}

#[derive(Debug)]
struct ConvBlock {
    weight: Tensor,
    bias: Vec<f32>,
    bn_gamma: Vec<f32>,
    bn_beta: Vec<f32>,
    bn_mean: Vec<f32>,
    bn_var: Vec<f32>,
    gate: Option<(Array2<f32>, Vec<f32>)>,
    stride: usize,
    padding: usize,
    pooling: (usize, usize),
}

/// CRNN reconstructed from saved hyperparameters and weights
#[derive(Debug)]
pub struct Crnn {
    config: CrnnConfig,
    blocks: Vec<ConvBlock>,
    gru: Vec<BiGru>,
    dense_w: Array2<f32>,
    dense_b: Vec<f32>,
    attention: Option<(Array2<f32>, Vec<f32>)>,
}

impl Crnn {
    /// Reconstruct the model, validating every weight shape against the
    /// hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Checkpoint` on any inconsistency between
    /// `config` and `weights`.
    pub fn new(config: &CrnnConfig, weights: &CrnnWeights) -> Result<Self, EvalError> {
        let n_blocks = config.nb_filters.len();
        if config.kernel_size.len() != n_blocks
            || config.padding.len() != n_blocks
            || config.stride.len() != n_blocks
            || config.pooling.len() != n_blocks
        {
            return Err(EvalError::Checkpoint(format!(
                "inconsistent conv hyperparameters: {} filters, {} kernels, {} paddings, {} strides, {} poolings",
                n_blocks,
                config.kernel_size.len(),
                config.padding.len(),
                config.stride.len(),
                config.pooling.len()
            )));
        }
        if weights.blocks.len() != n_blocks {
            return Err(EvalError::Checkpoint(format!(
                "expected {} conv blocks, checkpoint has {}",
                n_blocks,
                weights.blocks.len()
            )));
        }
        if config.n_in_channel != 1 {
            return Err(EvalError::Checkpoint(format!(
                "only single-channel input is supported, got n_in_channel={}",
                config.n_in_channel
            )));
        }
        let use_glu = match config.activation.as_str() {
            "glu" => true,
            "relu" => false,
            other => {
                return Err(EvalError::Checkpoint(format!(
                    "unknown activation '{}'",
                    other
                )))
            }
        };

        let mut blocks = Vec::with_capacity(n_blocks);
        let mut in_channels = config.n_in_channel;
        for (i, block) in weights.blocks.iter().enumerate() {
            let out = config.nb_filters[i];
            let k = config.kernel_size[i];
            let what = format!("conv block {}", i);
            block
                .conv_w
                .expect_shape(&[out, in_channels, k, k], &format!("{} weight", what))?;
            block.conv_b.expect_shape(&[out], &format!("{} bias", what))?;
            block
                .bn_gamma
                .expect_shape(&[out], &format!("{} bn gamma", what))?;
            block
                .bn_beta
                .expect_shape(&[out], &format!("{} bn beta", what))?;
            block
                .bn_mean
                .expect_shape(&[out], &format!("{} bn mean", what))?;
            block
                .bn_var
                .expect_shape(&[out], &format!("{} bn var", what))?;

            let gate = if use_glu {
                let (Some(gate_w), Some(gate_b)) = (&block.gate_w, &block.gate_b) else {
                    return Err(EvalError::Checkpoint(format!(
                        "{}: glu activation requires gate weights",
                        what
                    )));
                };
                gate_w.expect_shape(&[out, out], &format!("{} gate weight", what))?;
                gate_b.expect_shape(&[out], &format!("{} gate bias", what))?;
                Some((gate_w.to_array2()?, gate_b.data.clone()))
            } else {
                None
            };

            blocks.push(ConvBlock {
                weight: block.conv_w.clone(),
                bias: block.conv_b.data.clone(),
                bn_gamma: block.bn_gamma.data.clone(),
                bn_beta: block.bn_beta.data.clone(),
                bn_mean: block.bn_mean.data.clone(),
                bn_var: block.bn_var.data.clone(),
                gate,
                stride: config.stride[i],
                padding: config.padding[i],
                pooling: config.pooling[i],
            });
            in_channels = out;
        }

        if weights.gru.len() != config.n_layers_rnn {
            return Err(EvalError::Checkpoint(format!(
                "expected {} GRU layers, checkpoint has {}",
                config.n_layers_rnn,
                weights.gru.len()
            )));
        }
        let hidden = config.n_rnn_cell;
        let mut gru = Vec::with_capacity(weights.gru.len());
        for (l, layer) in weights.gru.iter().enumerate() {
            let build = |dir: &GruDirectionWeights, name: &str| -> Result<GruDirection, EvalError> {
                let what = format!("GRU layer {} {}", l, name);
                if dir.w_ih.shape.len() != 2 || dir.w_ih.shape[0] != 3 * hidden {
                    return Err(EvalError::Checkpoint(format!(
                        "{}: w_ih must be [3 * {}, input], got {:?}",
                        what, hidden, dir.w_ih.shape
                    )));
                }
                if l > 0 && dir.w_ih.shape[1] != 2 * hidden {
                    return Err(EvalError::Checkpoint(format!(
                        "{}: stacked layer input must be {}, got {}",
                        what,
                        2 * hidden,
                        dir.w_ih.shape[1]
                    )));
                }
                dir.w_hh
                    .expect_shape(&[3 * hidden, hidden], &format!("{} w_hh", what))?;
                dir.b_ih
                    .expect_shape(&[3 * hidden], &format!("{} b_ih", what))?;
                dir.b_hh
                    .expect_shape(&[3 * hidden], &format!("{} b_hh", what))?;
                Ok(GruDirection {
                    w_ih: dir.w_ih.to_array2()?,
                    w_hh: dir.w_hh.to_array2()?,
                    b_ih: ndarray::Array1::from_vec(dir.b_ih.data.clone()),
                    b_hh: ndarray::Array1::from_vec(dir.b_hh.data.clone()),
                    hidden,
                })
            };
            gru.push(BiGru {
                forward: build(&layer.forward, "forward")?,
                backward: build(&layer.backward, "backward")?,
            });
        }

        weights
            .dense_w
            .expect_shape(&[config.nclass, 2 * hidden], "dense weight")?;
        weights.dense_b.expect_shape(&[config.nclass], "dense bias")?;

        let attention = if config.attention {
            let (Some(att_w), Some(att_b)) = (&weights.attention_w, &weights.attention_b) else {
                return Err(EvalError::Checkpoint(
                    "attention enabled but attention weights missing".to_string(),
                ));
            };
            att_w.expect_shape(&[config.nclass, 2 * hidden], "attention weight")?;
            att_b.expect_shape(&[config.nclass], "attention bias")?;
            Some((att_w.to_array2()?, att_b.data.clone()))
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            blocks,
            gru,
            dense_w: weights.dense_w.to_array2()?,
            dense_b: weights.dense_b.data.clone(),
            attention,
        })
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.config.nclass
    }

    /// Product of the time-axis pooling windows: the factor by which the
    /// output frame rate is coarser than the input frame rate
    pub fn pooling_time_ratio(&self) -> usize {
        self.config.pooling.iter().map(|(t, _)| t).product()
    }

    /// Run the model over one clip's standardized features, `[frames, mels]`.
    ///
    /// # Errors
    ///
    /// Returns `EvalError::Inference` when the feature shape is
    /// incompatible with the convolutional stack or the GRU input size.
    pub fn forward(&self, features: &Array2<f32>) -> Result<CrnnOutput, EvalError> {
        let (n_frames, n_mels) = features.dim();
        let mut x = Array3::zeros((1, n_frames, n_mels));
        x.index_axis_mut(ndarray::Axis(0), 0).assign(features);

        for block in &self.blocks {
            let mut conv = conv2d(&x, &block.weight, &block.bias, block.stride, block.padding)?;
            batch_norm(
                &mut conv,
                &block.bn_gamma,
                &block.bn_beta,
                &block.bn_mean,
                &block.bn_var,
            );
            let activated = match &block.gate {
                Some((gate_w, gate_b)) => glu_gate(&conv, gate_w, gate_b),
                None => {
                    relu(&mut conv);
                    conv
                }
            };
            // dropout is inert at evaluation
            x = avg_pool2d(&activated, block.pooling)?;
        }

        // Flatten channels x frequency per output frame, channel-major
        let (channels, out_frames, freq_bins) = x.dim();
        let rnn_input_size = channels * freq_bins;
        let expected = self.gru[0].forward.w_ih.dim().1;
        if rnn_input_size != expected {
            return Err(EvalError::Inference(format!(
                "CNN output size {} ({} channels x {} frequency bins) does not match GRU input size {}",
                rnn_input_size, channels, freq_bins, expected
            )));
        }
        let mut recurrent = Array2::zeros((out_frames, rnn_input_size));
        for t in 0..out_frames {
            for c in 0..channels {
                for f in 0..freq_bins {
                    recurrent[[t, c * freq_bins + f]] = x[[c, t, f]];
                }
            }
        }

        for layer in &self.gru {
            recurrent = layer.run(&recurrent);
        }

        let mut strong = linear(&recurrent, &self.dense_w, &self.dense_b);
        strong.mapv_inplace(sigmoid);

        let weak = match &self.attention {
            Some((att_w, att_b)) => {
                // Per-frame softmax over classes, clamped, then
                // attention-weighted pooling over time
                let logits = linear(&recurrent, att_w, att_b);
                let mut attention = Array2::zeros(logits.dim());
                for (t, row) in logits.rows().into_iter().enumerate() {
                    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
                    let sum: f32 = exps.iter().sum();
                    for (c, e) in exps.iter().enumerate() {
                        attention[[t, c]] =
                            (e / sum).clamp(ATTENTION_CLAMP_MIN, ATTENTION_CLAMP_MAX);
                    }
                }
                (0..self.config.nclass)
                    .map(|c| {
                        let weighted: f32 = (0..out_frames)
                            .map(|t| strong[[t, c]] * attention[[t, c]])
                            .sum();
                        let norm: f32 = (0..out_frames).map(|t| attention[[t, c]]).sum();
                        weighted / norm
                    })
                    .collect()
            }
            None => (0..self.config.nclass)
                .map(|c| strong.column(c).sum() / out_frames as f32)
                .collect(),
        };

        Ok(CrnnOutput { strong, weak })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random weights for shape tests
    fn filled(shape: &[usize], seed: u32) -> Tensor {
        let len: usize = shape.iter().product();
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        let data = (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                ((state >> 8) as f32 / (1 << 24) as f32 - 0.5) * 0.2
            })
            .collect();
        Tensor::from_vec(shape, data).unwrap()
    }

    fn tiny_config() -> CrnnConfig {
        CrnnConfig {
            n_in_channel: 1,
            nclass: 2,
            attention: true,
            n_rnn_cell: 4,
            n_layers_rnn: 2,
            activation: "glu".to_string(),
            dropout: 0.5,
            kernel_size: vec![3, 3],
            padding: vec![1, 1],
            stride: vec![1, 1],
            nb_filters: vec![4, 4],
            pooling: vec![(2, 2), (2, 2)],
        }
    }

    fn tiny_weights(config: &CrnnConfig) -> CrnnWeights {
        let mut blocks = Vec::new();
        let mut in_ch = config.n_in_channel;
        for (i, &out) in config.nb_filters.iter().enumerate() {
            let k = config.kernel_size[i];
            blocks.push(ConvBlockWeights {
                conv_w: filled(&[out, in_ch, k, k], 10 + i as u32),
                conv_b: filled(&[out], 20 + i as u32),
                bn_gamma: Tensor::from_vec(&[out], vec![1.0; out]).unwrap(),
                bn_beta: Tensor::zeros(&[out]),
                bn_mean: Tensor::zeros(&[out]),
                bn_var: Tensor::from_vec(&[out], vec![1.0; out]).unwrap(),
                gate_w: Some(filled(&[out, out], 30 + i as u32)),
                gate_b: Some(Tensor::zeros(&[out])),
            });
            in_ch = out;
        }

        let hidden = config.n_rnn_cell;
        // After the conv stack: 4 channels x (8 mels / 4) = 8 inputs
        let mut gru = Vec::new();
        for l in 0..config.n_layers_rnn {
            let input = if l == 0 { 8 } else { 2 * hidden };
            let direction = |seed: u32| GruDirectionWeights {
                w_ih: filled(&[3 * hidden, input], seed),
                w_hh: filled(&[3 * hidden, hidden], seed + 1),
                b_ih: Tensor::zeros(&[3 * hidden]),
                b_hh: Tensor::zeros(&[3 * hidden]),
            };
            gru.push(GruLayerWeights {
                forward: direction(40 + l as u32 * 2),
                backward: direction(50 + l as u32 * 2),
            });
        }

        CrnnWeights {
            blocks,
            gru,
            dense_w: filled(&[config.nclass, 2 * hidden], 60),
            dense_b: Tensor::zeros(&[config.nclass]),
            attention_w: Some(filled(&[config.nclass, 2 * hidden], 61)),
            attention_b: Some(Tensor::zeros(&[config.nclass])),
        }
    }

    #[test]
    fn test_forward_shapes_and_ranges() {
        let config = tiny_config();
        let model = Crnn::new(&config, &tiny_weights(&config)).unwrap();
        assert_eq!(model.pooling_time_ratio(), 4);

        let features = Array2::from_shape_fn((16, 8), |(t, m)| ((t + m) % 5) as f32 * 0.1);
        let output = model.forward(&features).unwrap();
        assert_eq!(output.strong.dim(), (4, 2)); // 16 frames / ptr 4
        assert_eq!(output.weak.len(), 2);
        for &v in output.strong.iter().chain(output.weak.iter()) {
            assert!((0.0..=1.0).contains(&v), "probability out of range: {}", v);
        }
    }

    #[test]
    fn test_forward_is_deterministic() {
        let config = tiny_config();
        let model = Crnn::new(&config, &tiny_weights(&config)).unwrap();
        let features = Array2::from_shape_fn((16, 8), |(t, m)| (t as f32 - m as f32) * 0.05);
        let a = model.forward(&features).unwrap();
        let b = model.forward(&features).unwrap();
        assert_eq!(a.strong, b.strong);
        assert_eq!(a.weak, b.weak);
    }

    #[test]
    fn test_shape_mismatch_fails_at_construction() {
        let config = tiny_config();
        let mut weights = tiny_weights(&config);
        weights.dense_w = filled(&[3, 8], 99); // wrong class count
        let err = Crnn::new(&config, &weights).unwrap_err();
        assert!(matches!(err, EvalError::Checkpoint(_)));
    }

    #[test]
    fn test_missing_gate_weights_fail() {
        let config = tiny_config();
        let mut weights = tiny_weights(&config);
        weights.blocks[0].gate_w = None;
        assert!(Crnn::new(&config, &weights).is_err());
    }

    #[test]
    fn test_relu_variant_needs_no_gate() {
        let mut config = tiny_config();
        config.activation = "relu".to_string();
        config.attention = false;
        let mut weights = tiny_weights(&config);
        for block in &mut weights.blocks {
            block.gate_w = None;
            block.gate_b = None;
        }
        weights.attention_w = None;
        weights.attention_b = None;

        let model = Crnn::new(&config, &weights).unwrap();
        let features = Array2::from_elem((8, 8), 0.3);
        let output = model.forward(&features).unwrap();
        assert_eq!(output.strong.dim(), (2, 2));
    }

    #[test]
    fn test_rnn_input_size_mismatch_is_inference_error() {
        let config = tiny_config();
        let model = Crnn::new(&config, &tiny_weights(&config)).unwrap();
        // 16 mels -> 4 frequency bins after pooling -> 16 inputs, not 8
        let features = Array2::from_elem((16, 16), 0.1);
        let err = model.forward(&features).unwrap_err();
        assert!(matches!(err, EvalError::Inference(_)));
    }
}
