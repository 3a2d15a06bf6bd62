//! Trial runner: train one configuration several times and store the curves.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::model::{ModelSpec, create_model};
use crate::polynomial::DatasetCache;
use crate::store::{self, CompletionMarker, JobStatus};
use crate::table::ResultsTable;
use crate::train::{FitConfig, Shuffle};
use crate::{Error, Loss, Optimizer, Result};

/// Everything about a configuration except the optimizer, which comes from a
/// factory so every trial starts with untouched optimizer state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialJob {
    pub width: usize,
    pub dropout_rate: f32,
    pub layer_norm: bool,
    pub trials: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub loss: Loss,
    /// Base seed; each trial derives its own seeds from it.
    pub seed: u64,
}

impl TrialJob {
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(Error::InvalidConfig("trials must be > 0".to_owned()));
        }
        if self.width == 0 {
            return Err(Error::InvalidConfig("width must be > 0".to_owned()));
        }
        if !(self.dropout_rate.is_finite() && (0.0..1.0).contains(&self.dropout_rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {}",
                self.dropout_rate
            )));
        }
        self.fit_config(0, 0).validate()
    }

    fn fit_config(&self, shuffle_seed: u64, dropout_seed: u64) -> FitConfig {
        FitConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            shuffle: Shuffle::Seeded(shuffle_seed),
            seed: dropout_seed,
            loss: self.loss,
            ..FitConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    /// A finished table for this exact job was already on disk.
    Skipped,
    Completed { trials_trained: usize },
}

#[derive(Serialize)]
struct JobIdentity<'a> {
    job: &'a TrialJob,
    optimizer: Optimizer,
    dataset: &'a str,
}

/// Configuration key of `job` trained with `optimizer` on the data whose
/// fingerprint is `dataset` (see [`DatasetCache::fingerprint`]).
pub fn job_key(job: &TrialJob, optimizer: Optimizer, dataset: &str) -> Result<String> {
    store::config_key(&JobIdentity {
        job,
        optimizer,
        dataset,
    })
}

/// Seed for trial `trial` of the job identified by `key`.
pub fn trial_seed(base_seed: u64, key: &str, trial: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base_seed.to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update((trial as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Train `job.trials` fresh models and write their loss curves to `output_path`.
///
/// The job key covers the samples actually loaded, so the dataset is read (or
/// generated) before the store is consulted. Returns [`TrialOutcome::Skipped`]
/// without training or writing when `output_path` already holds a finished
/// table for this job. Failures propagate; nothing is written for a
/// configuration that fails part way.
pub fn run_trials<F>(
    output_path: &Path,
    datasets: &DatasetCache,
    make_optimizer: F,
    job: &TrialJob,
) -> Result<TrialOutcome>
where
    F: Fn() -> Optimizer,
{
    job.validate()?;
    let split = datasets.get()?;
    let key = job_key(job, make_optimizer(), datasets.fingerprint()?)?;

    match store::status(output_path, &key)? {
        JobStatus::Done => {
            info!(path = %output_path.display(), "results table up to date; skipping");
            return Ok(TrialOutcome::Skipped);
        }
        JobStatus::Stale => warn!(
            path = %output_path.display(),
            "results table has no completion marker; recomputing"
        ),
        JobStatus::Changed => warn!(
            path = %output_path.display(),
            "results table was produced by a different configuration; recomputing"
        ),
        JobStatus::Pending => {}
    }

    let spec = ModelSpec {
        input_dim: split.input_dim(),
        output_dim: split.target_dim(),
        width: job.width,
        dropout_rate: job.dropout_rate,
        layer_norm: job.layer_norm,
    };

    info!(
        path = %output_path.display(),
        width = job.width,
        dropout = job.dropout_rate,
        layer_norm = job.layer_norm,
        trials = job.trials,
        epochs = job.epochs,
        "training configuration"
    );

    let mut table = ResultsTable::new(job.epochs);
    for trial in 0..job.trials {
        let mut rng = StdRng::seed_from_u64(trial_seed(job.seed, &key, trial));
        let mut model = create_model(&spec, &mut rng)?;
        let fit = job.fit_config(rng.r#gen(), rng.r#gen());
        let history = model.fit(&split.train, Some(&split.val), make_optimizer(), &fit)?;
        debug!(
            trial,
            loss = history.loss.last().copied(),
            val_loss = history.val_loss.last().copied(),
            "trial finished"
        );
        table.push_trial(&history)?;
    }

    store::clear(output_path)?;
    table.write(output_path)?;
    store::mark_done(
        output_path,
        &CompletionMarker::new(key, job.trials, job.epochs),
    )?;
    info!(path = %output_path.display(), "results table written");

    Ok(TrialOutcome::Completed {
        trials_trained: job.trials,
    })
}
