use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::mlp::Module;
use crate::{Dataset, Error, Gradients, Loss, Mlp, Optimizer, Result, Trainer};

/// Epoch interval for debug progress lines.
const PROGRESS_EVERY: usize = 100;

/// Sample order per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    /// Visit samples in dataset order every epoch.
    None,
    /// Reshuffle every epoch from an RNG seeded once per `fit` call.
    Seeded(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: Shuffle,
    /// Seed for the dropout masks drawn during training.
    pub seed: u64,
    pub loss: Loss,
    /// L2 penalty on dense weights (`weight_decay * sum(w^2)`). Zero disables it.
    pub weight_decay: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            batch_size: 32,
            shuffle: Shuffle::Seeded(0),
            seed: 0,
            loss: Loss::Mse,
            weight_decay: 0.0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "weight_decay must be finite and >= 0, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

/// Per-epoch losses recorded by [`Mlp::fit`].
///
/// `val_loss` is empty when no validation set was given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub loss: Vec<f32>,
    pub val_loss: Vec<f32>,
}

impl History {
    #[inline]
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }
}

impl Mlp {
    /// Train with mini-batch updates, optionally validating after every epoch.
    ///
    /// Each call allocates fresh optimizer state from `optimizer`. The epoch's
    /// training loss is the mean per-sample loss with dropout active; the
    /// validation loss is computed in inference mode after the epoch's updates.
    ///
    /// Non-finite losses do not stop training; they are recorded as they are.
    pub fn fit(
        &mut self,
        train: &Dataset,
        val: Option<&Dataset>,
        optimizer: Optimizer,
        cfg: &FitConfig,
    ) -> Result<History> {
        cfg.validate()?;
        self.check_dataset("train", train)?;
        if let Some(val) = val {
            self.check_dataset("validation", val)?;
        }

        let mut opt = optimizer.state(self)?;
        let mut trainer = Trainer::new(self);
        let mut dropout_rng = StdRng::seed_from_u64(cfg.seed);
        let mut shuffle_rng = match cfg.shuffle {
            Shuffle::None => None,
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
        };

        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut history = History {
            loss: Vec::with_capacity(cfg.epochs),
            val_loss: Vec::with_capacity(if val.is_some() { cfg.epochs } else { 0 }),
        };
        let mut diverged = false;

        for epoch in 0..cfg.epochs {
            if let Some(rng) = shuffle_rng.as_mut() {
                order.shuffle(rng);
            }

            let mut total = 0.0_f32;
            for batch in order.chunks(cfg.batch_size) {
                trainer.grads.zero();
                for &idx in batch {
                    let input = train.input(idx);
                    self.forward_train(input, &mut trainer.scratch, &mut dropout_rng);
                    total += cfg.loss.backward(
                        trainer.scratch.output(),
                        train.target(idx),
                        trainer.grads.d_output_mut(),
                    );
                    self.backward(input, &trainer.scratch, &mut trainer.grads);
                }

                trainer.grads.scale(1.0 / batch.len() as f32);
                if cfg.weight_decay > 0.0 {
                    self.add_weight_decay(&mut trainer.grads, cfg.weight_decay);
                }
                opt.step(self, &mut trainer.grads);
            }

            let loss = total / train.len() as f32;
            history.loss.push(loss);
            let val_loss = match val {
                Some(val) => {
                    let l = self.evaluate(val, cfg.loss)?;
                    history.val_loss.push(l);
                    Some(l)
                }
                None => None,
            };

            if !diverged && !(loss.is_finite() && val_loss.is_none_or(f32::is_finite)) {
                diverged = true;
                warn!(epoch, loss, ?val_loss, "non-finite loss; training continues");
            }
            if (epoch + 1) % PROGRESS_EVERY == 0 || epoch + 1 == cfg.epochs {
                debug!(epoch = epoch + 1, epochs = cfg.epochs, loss, ?val_loss, "epoch done");
            }
        }

        Ok(history)
    }

    /// Mean per-sample loss over `data` in inference mode (dropout disabled).
    pub fn evaluate(&self, data: &Dataset, loss: Loss) -> Result<f32> {
        self.check_dataset("dataset", data)?;

        let mut scratch = self.scratch();
        let mut total = 0.0_f32;
        for idx in 0..data.len() {
            self.forward(data.input(idx), &mut scratch);
            total += loss.forward(scratch.output(), data.target(idx));
        }
        Ok(total / data.len() as f32)
    }

    fn check_dataset(&self, name: &str, data: &Dataset) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidData(format!("{name} must not be empty")));
        }
        if data.input_dim() != self.input_dim() {
            return Err(Error::InvalidData(format!(
                "{name} input_dim {} does not match model input_dim {}",
                data.input_dim(),
                self.input_dim()
            )));
        }
        if data.target_dim() != self.output_dim() {
            return Err(Error::InvalidData(format!(
                "{name} target_dim {} does not match model output_dim {}",
                data.target_dim(),
                self.output_dim()
            )));
        }
        Ok(())
    }

    /// Adds `d/dw (decay * w^2) = 2 * decay * w` for every dense weight.
    fn add_weight_decay(&self, grads: &mut Gradients, decay: f32) {
        for (idx, module) in self.modules().iter().enumerate() {
            if let Module::Dense(layer) = module {
                for (g, &w) in grads.d_weights_mut(idx).iter_mut().zip(layer.weights()) {
                    *g = (2.0 * decay).mul_add(w, *g);
                }
            }
        }
    }
}
