//! Model builder.
//!
//! `MlpBuilder` is the recommended way to define a model. Each call appends one
//! step to the module stack; the builder tracks the running feature width so
//! shapes line up by construction.
//!
//! Dense layers default to Xavier/Glorot uniform initialization. Use
//! [`MlpBuilder::add_dense_with_init`] to pick another scheme.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dropout::Dropout;
use crate::mlp::Module;
use crate::norm::{self, LayerNorm};
use crate::{Activation, Error, Init, Layer, Mlp, Result};

#[derive(Debug, Clone, Copy)]
enum ModuleSpec {
    Dense { out_dim: usize, init: Init },
    LayerNorm { eps: f32 },
    Dropout { rate: f32 },
    Activation(Activation),
}

#[derive(Debug, Clone)]
/// Builder for an `Mlp`.
///
/// Example:
///
/// ```rust
/// use poly_sweep::{Activation, MlpBuilder};
///
/// # fn main() -> poly_sweep::Result<()> {
/// let mlp = MlpBuilder::new(2)?
///     .add_dense(8)?
///     .add_activation(Activation::LeakyReLU { alpha: 0.2 })?
///     .add_dense(1)?
///     .build_with_seed(0)?;
/// assert_eq!(mlp.output_dim(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MlpBuilder {
    input_dim: usize,
    current_dim: usize,
    specs: Vec<ModuleSpec>,
}

impl MlpBuilder {
    /// Start building an MLP that accepts inputs of length `input_dim`.
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            current_dim: input_dim,
            specs: Vec::new(),
        })
    }

    /// Add a dense layer with `out_dim` outputs and Xavier initialization.
    pub fn add_dense(self, out_dim: usize) -> Result<Self> {
        self.add_dense_with_init(out_dim, Init::Xavier)
    }

    pub fn add_dense_with_init(mut self, out_dim: usize, init: Init) -> Result<Self> {
        if out_dim == 0 {
            return Err(Error::InvalidConfig("layer out_dim must be > 0".to_owned()));
        }
        self.specs.push(ModuleSpec::Dense { out_dim, init });
        self.current_dim = out_dim;
        Ok(self)
    }

    /// Add a layer normalization step over the current width.
    pub fn add_layer_norm(mut self) -> Result<Self> {
        self.specs.push(ModuleSpec::LayerNorm {
            eps: norm::DEFAULT_EPS,
        });
        Ok(self)
    }

    /// Add a dropout step with drop probability `rate` in `[0, 1)`.
    pub fn add_dropout(mut self, rate: f32) -> Result<Self> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        self.specs.push(ModuleSpec::Dropout { rate });
        Ok(self)
    }

    pub fn add_activation(mut self, activation: Activation) -> Result<Self> {
        activation.validate()?;
        self.specs.push(ModuleSpec::Activation(activation));
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Mlp> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Mlp> {
        if self.specs.is_empty() {
            return Err(Error::InvalidConfig(
                "mlp must have at least one module".to_owned(),
            ));
        }

        let mut modules = Vec::with_capacity(self.specs.len());
        let mut dim = self.input_dim;
        for spec in self.specs {
            let module = match spec {
                ModuleSpec::Dense { out_dim, init } => {
                    let layer = Layer::new_with_rng(dim, out_dim, init, rng)?;
                    dim = out_dim;
                    Module::Dense(layer)
                }
                ModuleSpec::LayerNorm { eps } => Module::LayerNorm(LayerNorm::new(dim, eps)?),
                ModuleSpec::Dropout { rate } => Module::Dropout(Dropout::new(dim, rate)?),
                ModuleSpec::Activation(activation) => Module::Activation { activation, dim },
            };
            modules.push(module);
        }
        debug_assert_eq!(dim, self.current_dim);

        Mlp::from_modules(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_widths_through_shape_preserving_steps() {
        let mlp = MlpBuilder::new(3)
            .unwrap()
            .add_dense(5)
            .unwrap()
            .add_layer_norm()
            .unwrap()
            .add_dropout(0.5)
            .unwrap()
            .add_activation(Activation::ReLU)
            .unwrap()
            .add_dense(2)
            .unwrap()
            .build_with_seed(0)
            .unwrap();

        assert_eq!(mlp.input_dim(), 3);
        assert_eq!(mlp.output_dim(), 2);
        assert_eq!(mlp.num_modules(), 5);
        // 3*5+5 dense, 5+5 norm, 5*2+2 dense
        assert_eq!(mlp.parameter_count(), 20 + 10 + 12);
    }

    #[test]
    fn builder_rejects_bad_inputs() {
        assert!(MlpBuilder::new(0).is_err());
        assert!(MlpBuilder::new(2).unwrap().add_dense(0).is_err());
        assert!(MlpBuilder::new(2).unwrap().add_dropout(1.0).is_err());
        assert!(MlpBuilder::new(2).unwrap().build_with_seed(0).is_err());
    }
}
