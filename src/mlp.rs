use rand::Rng;
use rand::rngs::StdRng;

use crate::dropout::Dropout;
use crate::norm::LayerNorm;
use crate::{Activation, Error, Layer, Result};

/// One step of the feed-forward stack.
#[derive(Debug, Clone)]
pub enum Module {
    Dense(Layer),
    LayerNorm(LayerNorm),
    Dropout(Dropout),
    Activation { activation: Activation, dim: usize },
}

impl Module {
    #[inline]
    pub fn in_dim(&self) -> usize {
        match self {
            Module::Dense(layer) => layer.in_dim(),
            Module::LayerNorm(norm) => norm.dim(),
            Module::Dropout(dropout) => dropout.dim(),
            Module::Activation { dim, .. } => *dim,
        }
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        match self {
            Module::Dense(layer) => layer.out_dim(),
            Module::LayerNorm(norm) => norm.dim(),
            Module::Dropout(dropout) => dropout.dim(),
            Module::Activation { dim, .. } => *dim,
        }
    }

    /// Lengths of the two trainable parameter buffers (weights/gain, biases/shift).
    #[inline]
    pub fn param_lens(&self) -> (usize, usize) {
        match self {
            Module::Dense(layer) => (layer.weights().len(), layer.biases().len()),
            Module::LayerNorm(norm) => (norm.dim(), norm.dim()),
            Module::Dropout(_) | Module::Activation { .. } => (0, 0),
        }
    }

    #[inline]
    pub fn parameter_count(&self) -> usize {
        let (w, b) = self.param_lens();
        w + b
    }

    /// Mutable views of the trainable parameters, if the module has any.
    pub fn params_mut(&mut self) -> Option<(&mut [f32], &mut [f32])> {
        match self {
            Module::Dense(layer) => Some(layer.params_mut()),
            Module::LayerNorm(norm) => Some(norm.params_mut()),
            Module::Dropout(_) | Module::Activation { .. } => None,
        }
    }

    /// Whether this step needs per-sample auxiliary buffers (dropout mask, normalized values).
    #[inline]
    fn needs_aux(&self) -> bool {
        matches!(self, Module::LayerNorm(_) | Module::Dropout(_))
    }
}

#[derive(Debug, Clone)]
pub struct Mlp {
    modules: Vec<Module>,
}

/// Reusable buffers for `Mlp::forward`.
///
/// The output of the most recent forward pass lives inside `Scratch`.
#[derive(Debug, Clone)]
pub struct Scratch {
    outputs: Vec<Vec<f32>>,
    // Per-module extras: dropout multipliers or layer-norm normalized values.
    aux: Vec<Vec<f32>>,
    inv_std: Vec<f32>,
}

/// Parameter gradients for an `Mlp`.
///
/// Parameter gradients accumulate across `Mlp::backward` calls until
/// `Gradients::zero` is called, so one buffer can hold a whole mini-batch.
#[derive(Debug, Clone)]
pub struct Gradients {
    d_weights: Vec<Vec<f32>>,
    d_biases: Vec<Vec<f32>>,

    // Backprop intermediate: gradient w.r.t each module output.
    // The last entry is the model output; losses write into it via `d_output_mut`.
    d_outputs: Vec<Vec<f32>>,

    d_input: Vec<f32>,
}

impl Mlp {
    /// Assemble a model from an ordered module stack.
    pub fn from_modules(modules: Vec<Module>) -> Result<Self> {
        if modules.is_empty() {
            return Err(Error::InvalidConfig(
                "mlp must have at least one module".to_owned(),
            ));
        }
        for (idx, pair) in modules.windows(2).enumerate() {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(Error::InvalidShape(format!(
                    "module {idx} out_dim {} does not match module {} in_dim {}",
                    pair[0].out_dim(),
                    idx + 1,
                    pair[1].in_dim()
                )));
            }
        }
        Ok(Self { modules })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.modules[0].in_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.modules[self.modules.len() - 1].out_dim()
    }

    #[inline]
    pub fn num_modules(&self) -> usize {
        self.modules.len()
    }

    /// The ordered module stack.
    #[inline]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    #[inline]
    pub fn module_mut(&mut self, idx: usize) -> Option<&mut Module> {
        self.modules.get_mut(idx)
    }

    pub fn parameter_count(&self) -> usize {
        self.modules.iter().map(Module::parameter_count).sum()
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    /// Convenience constructor: allocate all training buffers.
    #[inline]
    pub fn trainer(&self) -> Trainer {
        Trainer::new(self)
    }

    /// Inference-mode forward pass for a single sample (dropout disabled).
    ///
    /// Writes intermediate outputs into `scratch` and returns the final output slice.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_dim()`
    /// - `scratch` must be built for this `Mlp`
    pub fn forward<'a>(&self, input: &[f32], scratch: &'a mut Scratch) -> &'a [f32] {
        self.run_forward::<StdRng>(input, scratch, None)
    }

    /// Training-mode forward pass for a single sample (dropout active).
    ///
    /// Must precede `backward` when the model contains dropout.
    pub fn forward_train<'a, R: Rng + ?Sized>(
        &self,
        input: &[f32],
        scratch: &'a mut Scratch,
        rng: &mut R,
    ) -> &'a [f32] {
        self.run_forward(input, scratch, Some(rng))
    }

    fn run_forward<'a, R: Rng + ?Sized>(
        &self,
        input: &[f32],
        scratch: &'a mut Scratch,
        mut rng: Option<&mut R>,
    ) -> &'a [f32] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.outputs.len(),
            self.modules.len(),
            "scratch has {} module outputs, model has {} modules",
            scratch.outputs.len(),
            self.modules.len()
        );

        for (idx, module) in self.modules.iter().enumerate() {
            // Borrow the previous output immutably and the current output mutably.
            let (left, right) = scratch.outputs.split_at_mut(idx);
            let prev: &[f32] = if idx == 0 { input } else { &left[idx - 1] };
            let out = &mut right[0];
            assert_eq!(
                out.len(),
                module.out_dim(),
                "scratch module {idx} output len {} does not match module out_dim {}",
                out.len(),
                module.out_dim()
            );

            match module {
                Module::Dense(layer) => layer.forward(prev, out),
                Module::LayerNorm(norm) => {
                    scratch.inv_std[idx] = norm.forward(prev, out, &mut scratch.aux[idx]);
                }
                Module::Dropout(dropout) => match rng.as_deref_mut() {
                    Some(rng) => dropout.forward_train(prev, out, &mut scratch.aux[idx], rng),
                    None => dropout.forward_eval(prev, out),
                },
                Module::Activation { activation, .. } => activation.forward_slice(prev, out),
            }
        }

        scratch.output()
    }

    /// Backward pass for a single sample.
    ///
    /// Call `forward_train` (or `forward` for dropout-free models) first with the same
    /// `input` and `scratch`, and write `dL/d(output)` into `grads.d_output_mut()`.
    ///
    /// Parameter gradients are accumulated into `grads`. Returns dL/d(input).
    pub fn backward<'a>(
        &self,
        input: &[f32],
        scratch: &Scratch,
        grads: &'a mut Gradients,
    ) -> &'a [f32] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.outputs.len(),
            self.modules.len(),
            "scratch has {} module outputs, model has {} modules",
            scratch.outputs.len(),
            self.modules.len()
        );
        assert_eq!(
            grads.d_outputs.len(),
            self.modules.len(),
            "grads has {} d_outputs entries, model has {} modules",
            grads.d_outputs.len(),
            self.modules.len()
        );
        assert_eq!(
            grads.d_input.len(),
            self.input_dim(),
            "grads d_input len {} does not match model input_dim {}",
            grads.d_input.len(),
            self.input_dim()
        );

        for idx in (0..self.modules.len()).rev() {
            let module = &self.modules[idx];
            let module_input: &[f32] = if idx == 0 {
                input
            } else {
                &scratch.outputs[idx - 1]
            };
            let module_output: &[f32] = &scratch.outputs[idx];

            let (d_inputs, d_outputs): (&mut [f32], &[f32]) = if idx == 0 {
                (grads.d_input.as_mut_slice(), grads.d_outputs[0].as_slice())
            } else {
                // `d_inputs` of this module is `d_outputs` of the previous one.
                let (left, right) = grads.d_outputs.split_at_mut(idx);
                (left[idx - 1].as_mut_slice(), right[0].as_slice())
            };

            match module {
                Module::Dense(layer) => layer.backward(
                    module_input,
                    d_outputs,
                    d_inputs,
                    &mut grads.d_weights[idx],
                    &mut grads.d_biases[idx],
                ),
                Module::LayerNorm(norm) => norm.backward(
                    &scratch.aux[idx],
                    scratch.inv_std[idx],
                    d_outputs,
                    d_inputs,
                    &mut grads.d_weights[idx],
                    &mut grads.d_biases[idx],
                ),
                Module::Dropout(dropout) => dropout.backward(&scratch.aux[idx], d_outputs, d_inputs),
                Module::Activation { activation, .. } => {
                    activation.backward_slice(module_output, d_outputs, d_inputs)
                }
            }
        }

        &grads.d_input
    }

    /// Applies `param -= lr * d_param` to every trainable module.
    #[inline]
    pub fn sgd_step(&mut self, grads: &Gradients, lr: f32) {
        assert!(
            lr.is_finite() && lr >= 0.0,
            "learning rate must be finite and >= 0"
        );
        assert_eq!(
            self.modules.len(),
            grads.d_weights.len(),
            "grads has {} d_weights entries, model has {} modules",
            grads.d_weights.len(),
            self.modules.len()
        );

        for (idx, module) in self.modules.iter_mut().enumerate() {
            if let Some((weights, biases)) = module.params_mut() {
                sgd_update(weights, &grads.d_weights[idx], lr);
                sgd_update(biases, &grads.d_biases[idx], lr);
            }
        }
    }
}

#[inline]
fn sgd_update(params: &mut [f32], grads: &[f32], lr: f32) {
    debug_assert_eq!(params.len(), grads.len());
    for (p, &g) in params.iter_mut().zip(grads) {
        *p = (-lr).mul_add(g, *p);
    }
}

/// Reusable buffers for training a specific `Mlp`.
///
/// This is the ergonomic wrapper around `Scratch` + `Gradients`.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub scratch: Scratch,
    pub grads: Gradients,
}

impl Trainer {
    pub fn new(mlp: &Mlp) -> Self {
        Self {
            scratch: Scratch::new(mlp),
            grads: Gradients::new(mlp),
        }
    }
}

impl Scratch {
    pub fn new(mlp: &Mlp) -> Self {
        let mut outputs = Vec::with_capacity(mlp.modules.len());
        let mut aux = Vec::with_capacity(mlp.modules.len());
        for module in &mlp.modules {
            outputs.push(vec![0.0; module.out_dim()]);
            aux.push(if module.needs_aux() {
                vec![0.0; module.out_dim()]
            } else {
                Vec::new()
            });
        }
        Self {
            outputs,
            aux,
            inv_std: vec![0.0; mlp.modules.len()],
        }
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        self.outputs[self.outputs.len() - 1].as_slice()
    }
}

impl Gradients {
    pub fn new(mlp: &Mlp) -> Self {
        let mut d_weights = Vec::with_capacity(mlp.modules.len());
        let mut d_biases = Vec::with_capacity(mlp.modules.len());
        let mut d_outputs = Vec::with_capacity(mlp.modules.len());

        for module in &mlp.modules {
            let (w, b) = module.param_lens();
            d_weights.push(vec![0.0; w]);
            d_biases.push(vec![0.0; b]);
            d_outputs.push(vec![0.0; module.out_dim()]);
        }

        Self {
            d_weights,
            d_biases,
            d_outputs,
            d_input: vec![0.0; mlp.input_dim()],
        }
    }

    /// Reset accumulated parameter gradients to zero.
    pub fn zero(&mut self) {
        for g in self.d_weights.iter_mut().chain(self.d_biases.iter_mut()) {
            g.fill(0.0);
        }
    }

    /// Multiply accumulated parameter gradients by `factor` (e.g. `1 / batch_len`).
    pub fn scale(&mut self, factor: f32) {
        for g in self.d_weights.iter_mut().chain(self.d_biases.iter_mut()) {
            for v in g.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Mutable view of the upstream gradient buffer for the final model output.
    ///
    /// Typical training flow:
    /// - `mlp.forward_train(input, &mut scratch, &mut rng)`
    /// - loss writes `dL/d(output)` into `grads.d_output_mut()`
    /// - `mlp.backward(input, &scratch, &mut grads)`
    #[inline]
    pub fn d_output_mut(&mut self) -> &mut [f32] {
        let last = self.d_outputs.len() - 1;
        self.d_outputs[last].as_mut_slice()
    }

    #[inline]
    pub fn d_input(&self) -> &[f32] {
        &self.d_input
    }

    #[inline]
    pub fn num_modules(&self) -> usize {
        self.d_weights.len()
    }

    #[inline]
    pub fn d_weights(&self, module_idx: usize) -> &[f32] {
        &self.d_weights[module_idx]
    }

    #[inline]
    pub fn d_biases(&self, module_idx: usize) -> &[f32] {
        &self.d_biases[module_idx]
    }

    #[inline]
    pub fn d_weights_mut(&mut self, module_idx: usize) -> &mut [f32] {
        &mut self.d_weights[module_idx]
    }

    #[inline]
    pub fn d_biases_mut(&mut self, module_idx: usize) -> &mut [f32] {
        &mut self.d_biases[module_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MlpBuilder;
    use rand::SeedableRng;

    fn small_model() -> Mlp {
        MlpBuilder::new(2)
            .unwrap()
            .add_dense(4)
            .unwrap()
            .add_layer_norm()
            .unwrap()
            .add_activation(Activation::LeakyReLU { alpha: 0.2 })
            .unwrap()
            .add_dense(1)
            .unwrap()
            .build_with_seed(0)
            .unwrap()
    }

    fn loss_for_mlp(mlp: &Mlp, input: &[f32], target: &[f32], scratch: &mut Scratch) -> f32 {
        mlp.forward(input, scratch);
        crate::loss::mse(scratch.output(), target)
    }

    /// Returns the current value of a parameter, overwriting it when `value` is given.
    fn set_param(
        mlp: &mut Mlp,
        module_idx: usize,
        is_weight: bool,
        p: usize,
        value: Option<f32>,
    ) -> f32 {
        let (w, b) = mlp.module_mut(module_idx).unwrap().params_mut().unwrap();
        let buf = if is_weight { w } else { b };
        let old = buf[p];
        if let Some(v) = value {
            buf[p] = v;
        }
        old
    }

    fn assert_close(analytic: f32, numeric: f32, abs_tol: f32, rel_tol: f32) {
        let diff = (analytic - numeric).abs();
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        assert!(
            diff <= abs_tol || diff / scale <= rel_tol,
            "analytic={analytic} numeric={numeric} diff={diff}"
        );
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let a = small_model();
        let b = small_model();

        let mut scratch_a = a.scratch();
        let mut scratch_b = b.scratch();
        let input = [0.3_f32, -0.7_f32];

        let out_a = a.forward(&input, &mut scratch_a).to_vec();
        let out_b = b.forward(&input, &mut scratch_b).to_vec();
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn mismatched_module_dims_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let dense = Layer::new_with_rng(2, 3, crate::Init::Xavier, &mut rng).unwrap();
        let norm = LayerNorm::new(4, crate::norm::DEFAULT_EPS).unwrap();
        let err = Mlp::from_modules(vec![Module::Dense(dense), Module::LayerNorm(norm)]);
        assert!(matches!(err, Err(Error::InvalidShape(_))));
        assert!(Mlp::from_modules(Vec::new()).is_err());
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let mut mlp = small_model();
        let mut scratch = mlp.scratch();
        let mut grads = mlp.gradients();

        let input = [0.3_f32, -0.7_f32];
        let target = [0.2_f32];

        mlp.forward(&input, &mut scratch);
        let _loss = crate::loss::mse_backward(scratch.output(), &target, grads.d_output_mut());
        let d_input = mlp.backward(&input, &scratch, &mut grads).to_vec();

        let eps = 1e-3_f32;
        let abs_tol = 2e-3_f32;
        let rel_tol = 2e-2_f32;

        let mut scratch_tmp = mlp.scratch();

        for module_idx in 0..mlp.num_modules() {
            let (w_len, b_len) = mlp.modules()[module_idx].param_lens();

            for (is_weight, len) in [(true, w_len), (false, b_len)] {
                for p in 0..len {
                    let orig = set_param(&mut mlp, module_idx, is_weight, p, None);

                    set_param(&mut mlp, module_idx, is_weight, p, Some(orig + eps));
                    let loss_plus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);

                    set_param(&mut mlp, module_idx, is_weight, p, Some(orig - eps));
                    let loss_minus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);

                    set_param(&mut mlp, module_idx, is_weight, p, Some(orig));

                    let numeric = (loss_plus - loss_minus) / (2.0 * eps);
                    let analytic = if is_weight {
                        grads.d_weights(module_idx)[p]
                    } else {
                        grads.d_biases(module_idx)[p]
                    };
                    assert_close(analytic, numeric, abs_tol, rel_tol);
                }
            }
        }

        let mut input_var = input;
        for i in 0..input_var.len() {
            let orig = input_var[i];

            input_var[i] = orig + eps;
            let loss_plus = loss_for_mlp(&mlp, &input_var, &target, &mut scratch_tmp);

            input_var[i] = orig - eps;
            let loss_minus = loss_for_mlp(&mlp, &input_var, &target, &mut scratch_tmp);

            input_var[i] = orig;

            let numeric = (loss_plus - loss_minus) / (2.0 * eps);
            assert_close(d_input[i], numeric, abs_tol, rel_tol);
        }
    }

    #[test]
    fn dropout_backward_routes_through_mask() {
        let mlp = MlpBuilder::new(3)
            .unwrap()
            .add_dropout(0.5)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        let mut trainer = mlp.trainer();
        let mut rng = StdRng::seed_from_u64(3);
        let input = [1.0_f32, 1.0, 1.0];

        let out = mlp.forward_train(&input, &mut trainer.scratch, &mut rng).to_vec();
        trainer.grads.d_output_mut().fill(1.0);
        let d_input = mlp.backward(&input, &trainer.scratch, &mut trainer.grads);

        // Identity input, so each output equals the applied multiplier.
        assert_eq!(d_input, out.as_slice());
    }

    #[test]
    fn zero_and_scale_touch_only_parameter_gradients() {
        let mlp = small_model();
        let mut grads = mlp.gradients();
        grads.d_weights_mut(0).fill(2.0);
        grads.scale(0.5);
        assert!(grads.d_weights(0).iter().all(|&g| g == 1.0));
        grads.zero();
        assert!(grads.d_weights(0).iter().all(|&g| g == 0.0));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn forward_panics_on_input_shape_mismatch() {
        let mlp = small_model();
        let mut scratch = mlp.scratch();
        let input = [0.0_f32; 3];
        mlp.forward(&input, &mut scratch);
    }
}
