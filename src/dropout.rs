//! Inverted dropout.
//!
//! During training each unit is zeroed with probability `rate` and survivors are
//! scaled by `1 / (1 - rate)`, so inference is a plain pass-through.

use rand::Rng;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    dim: usize,
    rate: f32,
}

impl Dropout {
    pub fn new(dim: usize, rate: f32) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("dropout dim must be > 0".to_owned()));
        }
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        Ok(Self { dim, rate })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Probability of dropping each unit.
    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Training-mode forward pass. Writes the applied per-unit multiplier into `mask`.
    #[inline]
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        inputs: &[f32],
        outputs: &mut [f32],
        mask: &mut [f32],
        rng: &mut R,
    ) {
        debug_assert_eq!(inputs.len(), self.dim);
        debug_assert_eq!(outputs.len(), self.dim);
        debug_assert_eq!(mask.len(), self.dim);

        let keep_scale = 1.0 / (1.0 - self.rate);
        for i in 0..self.dim {
            let m = if rng.r#gen::<f32>() < self.rate {
                0.0
            } else {
                keep_scale
            };
            mask[i] = m;
            outputs[i] = inputs[i] * m;
        }
    }

    /// Inference-mode forward pass (identity).
    #[inline]
    pub fn forward_eval(&self, inputs: &[f32], outputs: &mut [f32]) {
        outputs.copy_from_slice(inputs);
    }

    #[inline]
    pub fn backward(&self, mask: &[f32], d_outputs: &[f32], d_inputs: &mut [f32]) {
        debug_assert_eq!(mask.len(), self.dim);
        for i in 0..self.dim {
            d_inputs[i] = d_outputs[i] * mask[i];
        }
    }
}
