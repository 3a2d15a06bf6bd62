//! Model factory for the regression networks used by the sweep.
//!
//! Every model is three hidden blocks followed by a linear head:
//!
//! ```text
//! [dense(width) -> layer norm? -> dropout? -> leaky relu(0.2)] x 3 -> dense(output_dim)
//! ```
//!
//! Layer norm is present only when `layer_norm` is set and dropout only when
//! `dropout_rate > 0`. The head has no activation, normalization or dropout.
//! Weight regularization is not applied here; `FitConfig::weight_decay` is the
//! hook for it and defaults to zero.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Activation, Error, Mlp, MlpBuilder, Result};

pub const HIDDEN_BLOCKS: usize = 3;
pub const LEAKY_RELU_SLOPE: f32 = 0.2;

/// Shape and regularization settings for one regression network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_dim: usize,
    pub output_dim: usize,
    pub width: usize,
    pub dropout_rate: f32,
    pub layer_norm: bool,
}

impl ModelSpec {
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 || self.width == 0 {
            return Err(Error::InvalidConfig(format!(
                "model dims must be > 0, got input_dim={} output_dim={} width={}",
                self.input_dim, self.output_dim, self.width
            )));
        }
        if !(self.dropout_rate.is_finite() && (0.0..1.0).contains(&self.dropout_rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }
}

/// Build a fresh, randomly initialized model for `spec`.
pub fn create_model<R: Rng + ?Sized>(spec: &ModelSpec, rng: &mut R) -> Result<Mlp> {
    spec.validate()?;

    let mut builder = MlpBuilder::new(spec.input_dim)?;
    for _ in 0..HIDDEN_BLOCKS {
        builder = builder.add_dense(spec.width)?;
        if spec.layer_norm {
            builder = builder.add_layer_norm()?;
        }
        if spec.dropout_rate > 0.0 {
            builder = builder.add_dropout(spec.dropout_rate)?;
        }
        builder = builder.add_activation(Activation::LeakyReLU {
            alpha: LEAKY_RELU_SLOPE,
        })?;
    }
    builder.add_dense(spec.output_dim)?.build_with_rng(rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mlp::Module;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spec(dropout_rate: f32, layer_norm: bool) -> ModelSpec {
        ModelSpec {
            input_dim: 1,
            output_dim: 1,
            width: 8,
            dropout_rate,
            layer_norm,
        }
    }

    fn dropout_rates(mlp: &Mlp) -> Vec<f32> {
        mlp.modules()
            .iter()
            .filter_map(|m| match m {
                Module::Dropout(d) => Some(d.rate()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn zero_dropout_adds_no_dropout_step() {
        let mut rng = StdRng::seed_from_u64(0);
        let mlp = create_model(&spec(0.0, false), &mut rng).unwrap();
        assert!(dropout_rates(&mlp).is_empty());
        // dense + activation per block, plus head
        assert_eq!(mlp.num_modules(), HIDDEN_BLOCKS * 2 + 1);
    }

    #[test]
    fn half_dropout_adds_one_step_per_block_with_exact_rate() {
        let mut rng = StdRng::seed_from_u64(0);
        let mlp = create_model(&spec(0.5, false), &mut rng).unwrap();
        assert_eq!(dropout_rates(&mlp), vec![0.5; HIDDEN_BLOCKS]);
    }

    #[test]
    fn block_order_is_dense_norm_dropout_activation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mlp = create_model(&spec(0.5, true), &mut rng).unwrap();
        let modules = mlp.modules();
        assert_eq!(modules.len(), HIDDEN_BLOCKS * 4 + 1);

        for block in modules[..HIDDEN_BLOCKS * 4].chunks(4) {
            assert!(matches!(block[0], Module::Dense(_)));
            assert!(matches!(block[1], Module::LayerNorm(_)));
            assert!(matches!(block[2], Module::Dropout(_)));
            assert!(matches!(
                block[3],
                Module::Activation {
                    activation: Activation::LeakyReLU { alpha },
                    ..
                } if alpha == LEAKY_RELU_SLOPE
            ));
        }
        assert!(matches!(modules[modules.len() - 1], Module::Dense(_)));
        assert_eq!(mlp.output_dim(), 1);
    }

    #[test]
    fn invalid_dims_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut bad = spec(0.0, false);
        bad.width = 0;
        assert!(create_model(&bad, &mut rng).is_err());

        let mut bad = spec(0.0, false);
        bad.input_dim = 0;
        assert!(create_model(&bad, &mut rng).is_err());
    }
}
