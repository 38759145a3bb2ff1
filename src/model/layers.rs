//! Neural network layer primitives
//!
//! Plain ndarray implementations of the layers the CRNN needs: 2-D
//! convolution, batch normalization on running statistics, a learned GLU
//! gate, average pooling, linear projection and a bidirectional GRU.
//! Everything here is inference-only.

use ndarray::{Array1, Array2, Array3};

use crate::checkpoint::Tensor;
use crate::error::EvalError;

/// Batch norm variance epsilon
const BN_EPSILON: f32 = 1e-5;

/// Logistic sigmoid
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 2-D convolution over `[channels, height, width]` input.
///
/// `weight` is `[out_channels, in_channels, kernel, kernel]`; square
/// kernel, symmetric zero padding, equal stride on both axes. These are
/// the only shapes the saved hyperparameters produce.
pub fn conv2d(
    input: &Array3<f32>,
    weight: &Tensor,
    bias: &[f32],
    stride: usize,
    padding: usize,
) -> Result<Array3<f32>, EvalError> {
    if weight.shape.len() != 4 {
        return Err(EvalError::Inference(format!(
            "convolution weight must be 4-D, got {:?}",
            weight.shape
        )));
    }
    let (out_ch, in_ch, kh, kw) = (
        weight.shape[0],
        weight.shape[1],
        weight.shape[2],
        weight.shape[3],
    );
    let (channels, height, width) = input.dim();
    if channels != in_ch {
        return Err(EvalError::Inference(format!(
            "convolution expects {} input channels, got {}",
            in_ch, channels
        )));
    }
    if stride == 0 {
        return Err(EvalError::Inference("convolution stride must be >= 1".to_string()));
    }
    let padded_h = height + 2 * padding;
    let padded_w = width + 2 * padding;
    if padded_h < kh || padded_w < kw {
        return Err(EvalError::Inference(format!(
            "input {}x{} too small for {}x{} kernel",
            height, width, kh, kw
        )));
    }
    let out_h = (padded_h - kh) / stride + 1;
    let out_w = (padded_w - kw) / stride + 1;

    let mut output = Array3::zeros((out_ch, out_h, out_w));
    for o in 0..out_ch {
        for y in 0..out_h {
            for x in 0..out_w {
                let mut acc = bias[o];
                for i in 0..in_ch {
                    for ky in 0..kh {
                        let in_y = (y * stride + ky) as isize - padding as isize;
                        if in_y < 0 || in_y >= height as isize {
                            continue;
                        }
                        for kx in 0..kw {
                            let in_x = (x * stride + kx) as isize - padding as isize;
                            if in_x < 0 || in_x >= width as isize {
                                continue;
                            }
                            acc += weight.at4(o, i, ky, kx)
                                * input[[i, in_y as usize, in_x as usize]];
                        }
                    }
                }
                output[[o, y, x]] = acc;
            }
        }
    }
    Ok(output)
}

/// Batch normalization on running statistics, in place
pub fn batch_norm(
    x: &mut Array3<f32>,
    gamma: &[f32],
    beta: &[f32],
    mean: &[f32],
    var: &[f32],
) {
    for (c, mut plane) in x.outer_iter_mut().enumerate() {
        let scale = gamma[c] / (var[c] + BN_EPSILON).sqrt();
        let shift = beta[c] - mean[c] * scale;
        plane.mapv_inplace(|v| v * scale + shift);
    }
}

/// Learned GLU gate over the channel dimension: at every spatial position,
/// the channel vector `c` becomes `c * sigmoid(W c + b)`
pub fn glu_gate(x: &Array3<f32>, weight: &Array2<f32>, bias: &[f32]) -> Array3<f32> {
    let (channels, height, width) = x.dim();
    let mut output = Array3::zeros((channels, height, width));
    let mut column = Array1::zeros(channels);
    for y in 0..height {
        for xi in 0..width {
            for c in 0..channels {
                column[c] = x[[c, y, xi]];
            }
            let gate = weight.dot(&column);
            for c in 0..channels {
                output[[c, y, xi]] = column[c] * sigmoid(gate[c] + bias[c]);
            }
        }
    }
    output
}

/// ReLU, in place
pub fn relu(x: &mut Array3<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Non-overlapping average pooling with window `(pool_h, pool_w)`;
/// trailing rows/columns that do not fill a window are dropped
pub fn avg_pool2d(x: &Array3<f32>, pool: (usize, usize)) -> Result<Array3<f32>, EvalError> {
    let (pool_h, pool_w) = pool;
    if pool_h == 0 || pool_w == 0 {
        return Err(EvalError::Inference("pooling window must be >= 1".to_string()));
    }
    let (channels, height, width) = x.dim();
    let out_h = height / pool_h;
    let out_w = width / pool_w;
    if out_h == 0 || out_w == 0 {
        return Err(EvalError::Inference(format!(
            "input {}x{} too small for {}x{} pooling",
            height, width, pool_h, pool_w
        )));
    }

    let norm = 1.0 / (pool_h * pool_w) as f32;
    let mut output = Array3::zeros((channels, out_h, out_w));
    for c in 0..channels {
        for y in 0..out_h {
            for xi in 0..out_w {
                let mut acc = 0.0;
                for dy in 0..pool_h {
                    for dx in 0..pool_w {
                        acc += x[[c, y * pool_h + dy, xi * pool_w + dx]];
                    }
                }
                output[[c, y, xi]] = acc * norm;
            }
        }
    }
    Ok(output)
}

/// Linear projection of every row: `[frames, in] -> [frames, out]`,
/// `weight` is `[out, in]`
pub fn linear(x: &Array2<f32>, weight: &Array2<f32>, bias: &[f32]) -> Array2<f32> {
    let mut output = x.dot(&weight.t());
    for mut row in output.rows_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v += bias[j];
        }
    }
    output
}

/// One GRU direction
#[derive(Debug, Clone)]
pub struct GruDirection {
    /// Input weights, `[3 * hidden, input]`, gate order reset/update/new
    pub w_ih: Array2<f32>,
    /// Recurrent weights, `[3 * hidden, hidden]`
    pub w_hh: Array2<f32>,
    /// Input bias, `3 * hidden`
    pub b_ih: Array1<f32>,
    /// Recurrent bias, `3 * hidden`
    pub b_hh: Array1<f32>,
    /// Hidden size
    pub hidden: usize,
}

impl GruDirection {
    /// Run over `[frames, input]`, optionally in reversed time order;
    /// the output is always in forward frame order, `[frames, hidden]`
    pub fn run(&self, input: &Array2<f32>, reverse: bool) -> Array2<f32> {
        let (n_frames, _) = input.dim();
        let h_size = self.hidden;
        let mut hidden = Array1::<f32>::zeros(h_size);
        let mut output = Array2::zeros((n_frames, h_size));

        let order: Vec<usize> = if reverse {
            (0..n_frames).rev().collect()
        } else {
            (0..n_frames).collect()
        };

        for t in order {
            let x_t = input.row(t);
            let gi = self.w_ih.dot(&x_t) + &self.b_ih;
            let gh = self.w_hh.dot(&hidden) + &self.b_hh;

            let mut next = Array1::zeros(h_size);
            for j in 0..h_size {
                let r = sigmoid(gi[j] + gh[j]);
                let z = sigmoid(gi[h_size + j] + gh[h_size + j]);
                let n = (gi[2 * h_size + j] + r * gh[2 * h_size + j]).tanh();
                next[j] = (1.0 - z) * n + z * hidden[j];
            }
            hidden = next;
            output.row_mut(t).assign(&hidden);
        }
        output
    }
}

/// Bidirectional GRU layer; forward and backward outputs are concatenated
/// per frame, `[frames, 2 * hidden]`
#[derive(Debug, Clone)]
pub struct BiGru {
    /// Forward direction
    pub forward: GruDirection,
    /// Backward direction
    pub backward: GruDirection,
}

impl BiGru {
    /// Run both directions over `[frames, input]`
    pub fn run(&self, input: &Array2<f32>) -> Array2<f32> {
        let fwd = self.forward.run(input, false);
        let bwd = self.backward.run(input, true);
        let (n_frames, h_size) = fwd.dim();
        let mut output = Array2::zeros((n_frames, 2 * h_size));
        output
            .slice_mut(ndarray::s![.., ..h_size])
            .assign(&fwd);
        output
            .slice_mut(ndarray::s![.., h_size..])
            .assign(&bwd);
        output
    }
}
