//! Dense (fully-connected) layer.
//!
//! Computes `y = W x + b` with no activation; activations, normalization and
//! dropout are separate steps in the module stack.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Weight initialization scheme.
pub enum Init {
    /// Glorot/Xavier uniform: `U(-sqrt(6 / (fan_in + fan_out)), +...)`.
    #[default]
    Xavier,
    /// He/Kaiming uniform: `U(-sqrt(6 / fan_in), +...)`.
    He,
}

#[derive(Debug, Clone)]
pub struct Layer {
    in_dim: usize,
    out_dim: usize,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl Layer {
    /// Build a layer with randomly initialized weights and zero biases.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let limit = match init {
            Init::Xavier => (6.0_f32 / (in_dim + out_dim) as f32).sqrt(),
            Init::He => (6.0_f32 / in_dim as f32).sqrt(),
        };
        let weights = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-limit..=limit))
            .collect();

        Ok(Self {
            in_dim,
            out_dim,
            weights,
            biases: vec![0.0; out_dim],
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    #[inline]
    pub fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    /// Weights and biases borrowed together for optimizer updates.
    #[inline]
    pub fn params_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.weights, &mut self.biases)
    }

    /// Forward pass for a single sample: `outputs = W * inputs + b`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f32], outputs: &mut [f32]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for o in 0..self.out_dim {
            let mut sum = self.biases[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                sum = self.weights[row + i].mul_add(inputs[i], sum);
            }
            outputs[o] = sum;
        }
    }

    /// Backward pass for a single sample.
    ///
    /// - `d_inputs` is overwritten.
    /// - `d_weights` and `d_biases` are *accumulated into*, so a mini-batch can sum
    ///   per-sample gradients before a single optimizer step.
    #[inline]
    pub fn backward(
        &self,
        inputs: &[f32],
        d_outputs: &[f32],
        d_inputs: &mut [f32],
        d_weights: &mut [f32],
        d_biases: &mut [f32],
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_inputs.len(), self.in_dim);
        debug_assert_eq!(d_weights.len(), self.weights.len());
        debug_assert_eq!(d_biases.len(), self.out_dim);

        d_inputs.fill(0.0);

        for o in 0..self.out_dim {
            let d_z = d_outputs[o];
            d_biases[o] += d_z;

            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                let w = self.weights[row + i];
                d_weights[row + i] = d_z.mul_add(inputs[i], d_weights[row + i]);
                d_inputs[i] = w.mul_add(d_z, d_inputs[i]);
            }
        }
    }
}
