//! Hyperparameter sweeps over small MLPs on a polynomial regression task.
//!
//! `poly-sweep` trains a grid of feed-forward regression networks (width,
//! dropout, layer norm, optimizer), several times each, records per-epoch
//! training and validation losses in CSV tables and renders each table as a
//! log-scale loss-curve PNG. Re-running a sweep only trains what is missing.
//!
//! The crate has two layers:
//!
//! - A small from-scratch MLP engine: [`Mlp`] is an ordered stack of
//!   [`Module`]s (dense, layer norm, dropout, activation) with per-sample,
//!   allocation-free forward/backward passes over reusable [`Scratch`] /
//!   [`Gradients`] buffers, plus [`Mlp::fit`] for mini-batch training.
//! - The sweep machinery: [`model::create_model`], [`polynomial::DatasetCache`],
//!   [`trials::run_trials`], [`table::ResultsTable`], [`plot::render`] and
//!   [`sweep::run_sweep`].
//!
//! # Panics vs `Result`
//!
//! - Low-level hot path (panics on misuse): [`Mlp::forward`],
//!   [`Mlp::forward_train`], [`Mlp::backward`]. Shape mismatches are
//!   programmer error and panic via `assert!`.
//! - Everything else validates its inputs and returns [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - [`Dataset`] and [`Inputs`] store samples contiguously in row-major layout.
//! - Layer weights are row-major with shape `(out_dim, in_dim)`.
//!
//! # Quick start
//!
//! ```rust
//! use poly_sweep::{Activation, Dataset, FitConfig, MlpBuilder, Optimizer};
//!
//! # fn main() -> poly_sweep::Result<()> {
//! let xs = vec![vec![-1.0], vec![-0.5], vec![0.0], vec![0.5], vec![1.0]];
//! let ys: Vec<Vec<f32>> = xs.iter().map(|x| vec![x[0] * x[0]]).collect();
//! let train = Dataset::from_rows(&xs, &ys)?;
//!
//! let mut mlp = MlpBuilder::new(1)?
//!     .add_dense(16)?
//!     .add_activation(Activation::LeakyReLU { alpha: 0.2 })?
//!     .add_dense(1)?
//!     .build_with_seed(0)?;
//!
//! let cfg = FitConfig {
//!     epochs: 50,
//!     batch_size: 5,
//!     ..FitConfig::default()
//! };
//! let history = mlp.fit(&train, Some(&train), Optimizer::sgd(0.05), &cfg)?;
//! assert_eq!(history.loss.len(), 50);
//! # Ok(())
//! # }
//! ```
//!
//! # Driving training by hand
//!
//! ```rust
//! use poly_sweep::{Activation, Loss, MlpBuilder};
//!
//! # fn main() -> poly_sweep::Result<()> {
//! let mut mlp = MlpBuilder::new(3)?
//!     .add_dense(8)?
//!     .add_layer_norm()?
//!     .add_activation(Activation::Tanh)?
//!     .add_dense(2)?
//!     .build_with_seed(0)?;
//!
//! let mut trainer = mlp.trainer();
//! let x = [0.1_f32, -0.2, 0.3];
//! let t = [0.0_f32, 1.0];
//!
//! let y = mlp.forward(&x, &mut trainer.scratch);
//! let _loss = Loss::Mse.backward(y, &t, trainer.grads.d_output_mut());
//! mlp.backward(&x, &trainer.scratch, &mut trainer.grads);
//! mlp.sgd_step(&trainer.grads, 1e-2);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod config;
pub mod data;
pub mod dropout;
pub mod error;
pub mod layer;
pub mod loss;
pub mod mlp;
pub mod model;
pub mod norm;
pub mod optim;
pub mod plot;
pub mod polynomial;
pub mod store;
pub mod sweep;
pub mod table;
pub mod train;
pub mod trials;

pub use activation::Activation;
pub use builder::MlpBuilder;
pub use config::{OptimizerPreset, SweepConfig, load_config};
pub use data::{Dataset, DatasetSplit, Inputs};
pub use error::{Error, Result};
pub use layer::{Init, Layer};
pub use loss::Loss;
pub use mlp::{Gradients, Mlp, Module, Scratch, Trainer};
pub use model::{ModelSpec, create_model};
pub use optim::{Optimizer, OptimizerState};
pub use sweep::{Configuration, SweepReport, run_sweep};
pub use train::{FitConfig, History, Shuffle};
pub use trials::{TrialJob, TrialOutcome, run_trials};
