//! Optimizers.
//!
//! `Optimizer` is a small, copyable description (kind + hyperparameters,
//! learning rate included). Calling [`Optimizer::state`] allocates a fresh
//! `OptimizerState` for one model, so every training run starts from untouched
//! momentum/moment buffers and a zeroed iteration counter.
//!
//! Design notes:
//! - Optimizer *state* lives outside the model.
//! - The training loop owns the state and reuses it across steps.
//! - `decay` is time-based learning-rate decay applied per update:
//!   `lr_t = lr / (1 + decay * iterations)`.

use serde::{Deserialize, Serialize};

use crate::{Error, Gradients, Mlp, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Optimizer choice for training.
pub enum Optimizer {
    /// Plain SGD.
    Sgd {
        lr: f32,
        #[serde(default)]
        decay: f32,
    },
    /// SGD with momentum.
    SgdMomentum {
        lr: f32,
        momentum: f32,
        #[serde(default)]
        decay: f32,
    },
    /// Adam (bias-corrected).
    Adam {
        lr: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
    },
}

impl Optimizer {
    /// Plain SGD with no decay.
    pub const fn sgd(lr: f32) -> Self {
        Optimizer::Sgd { lr, decay: 0.0 }
    }

    #[inline]
    pub fn learning_rate(self) -> f32 {
        match self {
            Optimizer::Sgd { lr, .. }
            | Optimizer::SgdMomentum { lr, .. }
            | Optimizer::Adam { lr, .. } => lr,
        }
    }

    #[inline]
    fn decay(self) -> f32 {
        match self {
            Optimizer::Sgd { decay, .. } | Optimizer::SgdMomentum { decay, .. } => decay,
            Optimizer::Adam { .. } => 0.0,
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }
        let decay = self.decay();
        if !(decay.is_finite() && decay >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "decay must be finite and >= 0, got {decay}"
            )));
        }

        match self {
            Optimizer::Sgd { .. } => Ok(()),
            Optimizer::SgdMomentum { momentum, .. } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum must be finite and in [0,1), got {momentum}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam {
                beta1, beta2, eps, ..
            } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate fresh optimizer state for `model`.
    pub fn state(self, model: &Mlp) -> Result<OptimizerState> {
        self.validate()?;

        let moments = match self {
            Optimizer::Sgd { .. } => Moments::None,
            Optimizer::SgdMomentum { momentum, .. } => {
                let (vw, vb) = zeros_like_params(model);
                Moments::Velocity {
                    momentum,
                    v_weights: vw,
                    v_biases: vb,
                }
            }
            Optimizer::Adam {
                beta1, beta2, eps, ..
            } => {
                let (mw, mb) = zeros_like_params(model);
                let (vw, vb) = zeros_like_params(model);
                Moments::Adam {
                    beta1,
                    beta2,
                    eps,
                    beta1_pow: 1.0,
                    beta2_pow: 1.0,
                    m_weights: mw,
                    m_biases: mb,
                    v_weights: vw,
                    v_biases: vb,
                }
            }
        };

        Ok(OptimizerState {
            lr: self.learning_rate(),
            decay: self.decay(),
            iterations: 0,
            moments,
        })
    }
}

#[derive(Debug, Clone)]
/// Owned optimizer state for one training run.
pub struct OptimizerState {
    lr: f32,
    decay: f32,
    iterations: u64,
    moments: Moments,
}

#[derive(Debug, Clone)]
enum Moments {
    None,
    Velocity {
        momentum: f32,
        v_weights: Vec<Vec<f32>>,
        v_biases: Vec<Vec<f32>>,
    },
    Adam {
        beta1: f32,
        beta2: f32,
        eps: f32,
        beta1_pow: f32,
        beta2_pow: f32,
        m_weights: Vec<Vec<f32>>,
        m_biases: Vec<Vec<f32>>,
        v_weights: Vec<Vec<f32>>,
        v_biases: Vec<Vec<f32>>,
    },
}

impl OptimizerState {
    /// Number of updates applied so far.
    #[inline]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Learning rate the next update will use.
    #[inline]
    pub fn current_lr(&self) -> f32 {
        self.lr / (1.0 + self.decay * self.iterations as f32)
    }

    /// Apply one optimizer step.
    ///
    /// `grads` may be overwritten with the update direction (Adam).
    pub fn step(&mut self, model: &mut Mlp, grads: &mut Gradients) {
        let lr = self.current_lr();

        match &mut self.moments {
            Moments::None => {
                model.sgd_step(grads, lr);
            }
            Moments::Velocity {
                momentum,
                v_weights,
                v_biases,
            } => {
                debug_assert_eq!(v_weights.len(), model.num_modules());

                for idx in 0..model.num_modules() {
                    let vw = &mut v_weights[idx];
                    let vb = &mut v_biases[idx];
                    if vw.is_empty() && vb.is_empty() {
                        continue;
                    }

                    for (v, &g) in vw.iter_mut().zip(grads.d_weights(idx)) {
                        *v = (*momentum) * *v + g;
                    }
                    for (v, &g) in vb.iter_mut().zip(grads.d_biases(idx)) {
                        *v = (*momentum) * *v + g;
                    }

                    // Reuse `grads` as the update direction.
                    grads.d_weights_mut(idx).copy_from_slice(vw);
                    grads.d_biases_mut(idx).copy_from_slice(vb);
                }

                model.sgd_step(grads, lr);
            }
            Moments::Adam {
                beta1,
                beta2,
                eps,
                beta1_pow,
                beta2_pow,
                m_weights,
                m_biases,
                v_weights,
                v_biases,
            } => {
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                // Overwrite `grads` with the Adam update direction and then reuse `sgd_step`.
                for idx in 0..model.num_modules() {
                    adam_direction(
                        grads.d_weights_mut(idx),
                        &mut m_weights[idx],
                        &mut v_weights[idx],
                        (*beta1, *beta2, *eps),
                        (corr1, corr2),
                    );
                    adam_direction(
                        grads.d_biases_mut(idx),
                        &mut m_biases[idx],
                        &mut v_biases[idx],
                        (*beta1, *beta2, *eps),
                        (corr1, corr2),
                    );
                }

                model.sgd_step(grads, lr);
            }
        }

        self.iterations += 1;
    }
}

#[inline]
fn adam_direction(
    upd: &mut [f32],
    m: &mut [f32],
    v: &mut [f32],
    (beta1, beta2, eps): (f32, f32, f32),
    (corr1, corr2): (f32, f32),
) {
    debug_assert_eq!(upd.len(), m.len());
    debug_assert_eq!(upd.len(), v.len());

    for i in 0..upd.len() {
        let g = upd[i];
        m[i] = beta1 * m[i] + (1.0 - beta1) * g;
        v[i] = beta2 * v[i] + (1.0 - beta2) * (g * g);

        let m_hat = m[i] / corr1;
        let v_hat = v[i] / corr2;
        upd[i] = m_hat / (v_hat.sqrt() + eps);
    }
}

fn zeros_like_params(model: &Mlp) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    model
        .modules()
        .iter()
        .map(|m| {
            let (w, b) = m.param_lens();
            (vec![0.0; w], vec![0.0; b])
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MlpBuilder;

    fn unit_model() -> Mlp {
        let mut mlp = MlpBuilder::new(1)
            .unwrap()
            .add_dense(1)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        let (w, b) = mlp.module_mut(0).unwrap().params_mut().unwrap();
        w[0] = 1.0;
        b[0] = 2.0;
        mlp
    }

    fn params(mlp: &mut Mlp) -> (f32, f32) {
        let (w, b) = mlp.module_mut(0).unwrap().params_mut().unwrap();
        (w[0], b[0])
    }

    #[test]
    fn optimizer_validation_rejects_bad_hyperparams() {
        assert!(Optimizer::sgd(0.0).validate().is_err());
        assert!(Optimizer::sgd(f32::NAN).validate().is_err());
        assert!(
            Optimizer::Sgd {
                lr: 0.1,
                decay: -1.0
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::SgdMomentum {
                lr: 0.1,
                momentum: 1.0,
                decay: 0.0
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::Adam {
                lr: 0.1,
                beta1: 0.9,
                beta2: 0.999,
                eps: 0.0
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn sgd_step_moves_against_gradient() {
        let mut mlp = unit_model();
        let mut grads = mlp.gradients();
        grads.d_weights_mut(0)[0] = 3.0;
        grads.d_biases_mut(0)[0] = 4.0;

        let mut opt = Optimizer::sgd(0.1).state(&mlp).unwrap();
        opt.step(&mut mlp, &mut grads);

        let (w, b) = params(&mut mlp);
        assert!((w - 0.7).abs() < 1e-6);
        assert!((b - 1.6).abs() < 1e-6);
        assert_eq!(opt.iterations(), 1);
    }

    #[test]
    fn decay_shrinks_learning_rate_per_iteration() {
        let mlp = unit_model();
        let mut model = mlp.clone();
        let mut grads = mlp.gradients();
        let mut opt = Optimizer::Sgd { lr: 1.0, decay: 1.0 }.state(&mlp).unwrap();

        assert_eq!(opt.current_lr(), 1.0);
        opt.step(&mut model, &mut grads);
        assert!((opt.current_lr() - 0.5).abs() < 1e-6);
        opt.step(&mut model, &mut grads);
        assert!((opt.current_lr() - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn sgd_momentum_updates_like_sgd_on_first_step() {
        let mut mlp = unit_model();
        let mut grads = mlp.gradients();
        grads.d_weights_mut(0)[0] = 3.0;
        grads.d_biases_mut(0)[0] = 4.0;

        let mut opt = Optimizer::SgdMomentum {
            lr: 0.1,
            momentum: 0.9,
            decay: 0.0,
        }
        .state(&mlp)
        .unwrap();
        opt.step(&mut mlp, &mut grads);

        let (w, b) = params(&mut mlp);
        assert!((w - (1.0 - 0.1 * 3.0)).abs() < 1e-6);
        assert!((b - (2.0 - 0.1 * 4.0)).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_matches_expected_direction_for_unit_grad() {
        let mut mlp = unit_model();
        let mut grads = mlp.gradients();
        grads.d_weights_mut(0)[0] = 1.0;
        grads.d_biases_mut(0)[0] = 1.0;

        let mut opt = Optimizer::Adam {
            lr: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0,
        }
        .state(&mlp)
        .unwrap();
        opt.step(&mut mlp, &mut grads);

        // With eps=1.0 and unit grad, the first bias-corrected step has update ~= 1/(1+eps) = 0.5.
        let (w, b) = params(&mut mlp);
        assert!((w - (1.0 - 0.1 * 0.5)).abs() < 1e-6);
        assert!((b - (2.0 - 0.1 * 0.5)).abs() < 1e-6);
    }

    #[test]
    fn fresh_state_per_call() {
        let mlp = unit_model();
        let mut model = mlp.clone();
        let mut grads = mlp.gradients();
        let optimizer = Optimizer::Sgd { lr: 1.0, decay: 1.0 };

        let mut first = optimizer.state(&mlp).unwrap();
        first.step(&mut model, &mut grads);
        let second = optimizer.state(&mlp).unwrap();
        assert_eq!(second.iterations(), 0);
        assert_eq!(second.current_lr(), 1.0);
    }

    #[test]
    fn serde_uses_kind_tag() {
        let json = serde_json::to_string(&Optimizer::sgd(0.01)).unwrap();
        assert!(json.contains("\"kind\":\"sgd\""));
        let back: Optimizer = serde_json::from_str(r#"{"kind":"sgd","lr":0.01}"#).unwrap();
        assert_eq!(back, Optimizer::sgd(0.01));
    }
}
