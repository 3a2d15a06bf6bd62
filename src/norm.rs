//! Layer normalization.
//!
//! Normalizes each sample across its features, then applies a learned gain and
//! shift: `y = gain * (x - mean) / sqrt(var + eps) + shift`.

use crate::{Error, Result};

pub const DEFAULT_EPS: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct LayerNorm {
    dim: usize,
    eps: f32,
    gain: Vec<f32>,
    shift: Vec<f32>,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("layer norm dim must be > 0".to_owned()));
        }
        if !(eps.is_finite() && eps > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "layer norm eps must be finite and > 0, got {eps}"
            )));
        }
        Ok(Self {
            dim,
            eps,
            gain: vec![1.0; dim],
            shift: vec![0.0; dim],
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn eps(&self) -> f32 {
        self.eps
    }

    #[inline]
    pub fn gain(&self) -> &[f32] {
        &self.gain
    }

    #[inline]
    pub fn shift(&self) -> &[f32] {
        &self.shift
    }

    #[inline]
    pub fn params_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.gain, &mut self.shift)
    }

    /// Forward pass for a single sample.
    ///
    /// Writes the normalized (pre-gain) values into `x_hat` for use by `backward`
    /// and returns `1 / sqrt(var + eps)`.
    #[inline]
    pub fn forward(&self, inputs: &[f32], outputs: &mut [f32], x_hat: &mut [f32]) -> f32 {
        debug_assert_eq!(inputs.len(), self.dim);
        debug_assert_eq!(outputs.len(), self.dim);
        debug_assert_eq!(x_hat.len(), self.dim);

        let inv_n = 1.0 / self.dim as f32;
        let mean = inputs.iter().sum::<f32>() * inv_n;
        let var = inputs
            .iter()
            .map(|&x| (x - mean) * (x - mean))
            .sum::<f32>()
            * inv_n;
        let inv_std = 1.0 / (var + self.eps).sqrt();

        for i in 0..self.dim {
            let n = (inputs[i] - mean) * inv_std;
            x_hat[i] = n;
            outputs[i] = self.gain[i].mul_add(n, self.shift[i]);
        }
        inv_std
    }

    /// Backward pass for a single sample.
    ///
    /// `d_inputs` is overwritten; `d_gain` and `d_shift` are accumulated into.
    #[inline]
    pub fn backward(
        &self,
        x_hat: &[f32],
        inv_std: f32,
        d_outputs: &[f32],
        d_inputs: &mut [f32],
        d_gain: &mut [f32],
        d_shift: &mut [f32],
    ) {
        debug_assert_eq!(x_hat.len(), self.dim);
        debug_assert_eq!(d_outputs.len(), self.dim);
        debug_assert_eq!(d_inputs.len(), self.dim);

        let mut sum_dxhat = 0.0_f32;
        let mut sum_dxhat_xhat = 0.0_f32;
        for i in 0..self.dim {
            d_gain[i] = d_outputs[i].mul_add(x_hat[i], d_gain[i]);
            d_shift[i] += d_outputs[i];

            let d_xhat = d_outputs[i] * self.gain[i];
            sum_dxhat += d_xhat;
            sum_dxhat_xhat = d_xhat.mul_add(x_hat[i], sum_dxhat_xhat);
        }

        let n = self.dim as f32;
        let scale = inv_std / n;
        for i in 0..self.dim {
            let d_xhat = d_outputs[i] * self.gain[i];
            d_inputs[i] = scale * (n * d_xhat - sum_dxhat - x_hat[i] * sum_dxhat_xhat);
        }
    }
}
