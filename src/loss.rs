//! Loss functions.
//!
//! These are small, allocation-free helpers intended to be used like:
//!
//! - run `model.forward_train(...)`
//! - compute `d_output` via `Loss::backward`
//! - run `model.backward(...)`
//! - update parameters with an optimizer

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Supported loss functions.
pub enum Loss {
    /// Mean squared error: `mean((pred - target)^2)`.
    #[default]
    Mse,
    /// Mean absolute error: `mean(|pred - target|)`.
    Mae,
}

impl Loss {
    /// Compute a loss value.
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f32], target: &[f32]) -> f32 {
        match self {
            Loss::Mse => mse(pred, target),
            Loss::Mae => mae(pred, target),
        }
    }

    /// Compute loss + gradient w.r.t `pred`.
    ///
    /// Writes `d_pred = dL/d(pred)` into `d_pred` and returns the loss.
    #[inline]
    pub fn backward(self, pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
        match self {
            Loss::Mse => mse_backward(pred, target, d_pred),
            Loss::Mae => mae_backward(pred, target, d_pred),
        }
    }
}

/// Mean squared error.
#[inline]
pub fn mse(pred: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq / pred.len() as f32
}

/// MSE loss + gradient w.r.t. `pred`: `d_pred[i] = 2 * (pred[i] - target[i]) / N`.
#[inline]
pub fn mse_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    let mut sum_sq = 0.0_f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
        d_pred[i] = 2.0 * diff * inv_n;
    }
    sum_sq * inv_n
}

/// Mean absolute error.
#[inline]
pub fn mae(pred: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let sum: f32 = pred.iter().zip(target).map(|(p, t)| (p - t).abs()).sum();
    sum / pred.len() as f32
}

/// MAE loss + (sub)gradient w.r.t. `pred`: `sign(pred - target) / N`.
#[inline]
pub fn mae_backward(pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let inv_n = 1.0 / pred.len() as f32;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        d_pred[i] = if diff > 0.0 {
            inv_n
        } else if diff < 0.0 {
            -inv_n
        } else {
            0.0
        };
    }
    mae(pred, target)
}
