//! Activation functions.
//!
//! In this crate an activation is its own step in the module stack: it maps each
//! element of the previous step's output through a fixed function.
//!
//! We cache the *post-activation* outputs `y` in `Scratch`. During backprop we
//! compute `dL/dx` from `dL/dy` using `y`, which keeps the per-sample hot path
//! allocation-free without a separate pre-activation buffer.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Element-wise activation function.
pub enum Activation {
    Tanh,
    ReLU,
    LeakyReLU { alpha: f32 },
    Identity,
}

impl Activation {
    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Activation::LeakyReLU { alpha } => {
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "leaky ReLU alpha must be finite and >= 0, got {alpha}"
                    )));
                }
            }
            Activation::Tanh | Activation::ReLU | Activation::Identity => {}
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn forward(self, x: f32) -> f32 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Activation::Identity => x,
        }
    }

    /// Derivative of the activation with respect to its input, expressed in terms
    /// of the cached post-activation output `y`.
    #[inline]
    pub(crate) fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::Tanh => 1.0 - y * y,
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyReLU { alpha } => {
                if y > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Identity => 1.0,
        }
    }

    /// Apply the activation element-wise.
    #[inline]
    pub(crate) fn forward_slice(self, inputs: &[f32], outputs: &mut [f32]) {
        debug_assert_eq!(inputs.len(), outputs.len());
        for (y, &x) in outputs.iter_mut().zip(inputs) {
            *y = self.forward(x);
        }
    }

    /// Backprop through the activation: `d_inputs = d_outputs * f'(x)`.
    #[inline]
    pub(crate) fn backward_slice(self, outputs: &[f32], d_outputs: &[f32], d_inputs: &mut [f32]) {
        debug_assert_eq!(outputs.len(), d_outputs.len());
        debug_assert_eq!(outputs.len(), d_inputs.len());
        for i in 0..outputs.len() {
            d_inputs[i] = d_outputs[i] * self.grad_from_output(outputs[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaky_relu_alpha_must_be_finite_and_non_negative() {
        assert!(
            Activation::LeakyReLU { alpha: f32::NAN }
                .validate()
                .is_err()
        );
        assert!(Activation::LeakyReLU { alpha: -0.1 }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: 0.2 }.validate().is_ok());
    }

    #[test]
    fn relu_and_leaky_relu_shapes() {
        assert_eq!(Activation::ReLU.forward(-2.0), 0.0);
        assert_eq!(Activation::ReLU.forward(3.0), 3.0);

        let act = Activation::LeakyReLU { alpha: 0.2 };
        assert!((act.forward(-2.0) + 0.4).abs() < 1e-6);
        assert_eq!(act.forward(3.0), 3.0);

        // Gradients expressed via cached outputs.
        assert_eq!(Activation::ReLU.grad_from_output(0.0), 0.0);
        assert_eq!(Activation::ReLU.grad_from_output(1.0), 1.0);
        assert_eq!(act.grad_from_output(-0.4), 0.2);
        assert_eq!(act.grad_from_output(3.0), 1.0);
    }

    #[test]
    fn slice_backward_scales_upstream_gradient() {
        let act = Activation::LeakyReLU { alpha: 0.2 };
        let x = [-1.0_f32, 2.0];
        let mut y = [0.0_f32; 2];
        act.forward_slice(&x, &mut y);

        let mut d_x = [0.0_f32; 2];
        act.backward_slice(&y, &[1.0, 1.0], &mut d_x);
        assert!((d_x[0] - 0.2).abs() < 1e-6);
        assert_eq!(d_x[1], 1.0);
    }

    #[test]
    fn tanh_gradient_from_output() {
        let y = Activation::Tanh.forward(0.3);
        let g = Activation::Tanh.grad_from_output(y);
        assert!((g - (1.0 - y * y)).abs() < 1e-6);
    }
}
