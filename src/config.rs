//! Sweep configuration.
//!
//! [`SweepConfig::default`] is the full polynomial baseline sweep: five SGD
//! learning rates, five widths, with and without dropout and layer norm
//! (100 configurations, 10 trials of 1000 epochs each). Any field can be
//! overridden from JSON; missing fields keep their defaults.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::polynomial::PolynomialTask;
use crate::{Error, Loss, Optimizer, Result};

/// A named optimizer; the name goes into output file names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerPreset {
    pub name: String,
    pub optimizer: Optimizer,
}

impl OptimizerPreset {
    pub fn new(name: impl Into<String>, optimizer: Optimizer) -> Self {
        Self {
            name: name.into(),
            optimizer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub base_dir: PathBuf,
    pub file_prefix: String,
    /// File name of the shared dataset cache inside `base_dir`.
    pub dataset_file: String,
    pub optimizers: Vec<OptimizerPreset>,
    pub widths: Vec<usize>,
    pub dropouts: Vec<f32>,
    pub layer_norm: Vec<bool>,
    pub trials: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub loss: Loss,
    pub seed: u64,
    pub task: PolynomialTask,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output/polynomial"),
            file_prefix: "polynomial".to_owned(),
            dataset_file: "test-set.json".to_owned(),
            optimizers: vec![
                OptimizerPreset::new("sgd-1e1", Optimizer::sgd(1e-1)),
                OptimizerPreset::new("sgd-1e2", Optimizer::sgd(1e-2)),
                OptimizerPreset::new("sgd-1e3", Optimizer::sgd(1e-3)),
                OptimizerPreset::new("sgd-1e4", Optimizer::sgd(1e-4)),
                OptimizerPreset::new("sgd-1e5", Optimizer::sgd(1e-5)),
            ],
            widths: vec![64, 128, 256, 512, 1024],
            dropouts: vec![0.0, 0.5],
            layer_norm: vec![false, true],
            trials: 10,
            epochs: 1000,
            batch_size: 32,
            loss: Loss::Mse,
            seed: 0,
            task: PolynomialTask::default(),
        }
    }
}

impl SweepConfig {
    pub fn dataset_path(&self) -> PathBuf {
        self.base_dir.join(&self.dataset_file)
    }

    /// Number of configurations the sweep enumerates.
    pub fn configuration_count(&self) -> usize {
        self.optimizers.len() * self.widths.len() * self.dropouts.len() * self.layer_norm.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_prefix.is_empty() {
            return Err(Error::InvalidConfig("file_prefix must not be empty".to_owned()));
        }
        if self.dataset_file.is_empty() {
            return Err(Error::InvalidConfig("dataset_file must not be empty".to_owned()));
        }
        if self.configuration_count() == 0 {
            return Err(Error::InvalidConfig(
                "optimizers, widths, dropouts and layer_norm must all be non-empty".to_owned(),
            ));
        }

        let mut names = HashSet::new();
        for preset in &self.optimizers {
            if preset.name.is_empty() {
                return Err(Error::InvalidConfig("optimizer name must not be empty".to_owned()));
            }
            if !names.insert(preset.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate optimizer name {:?}",
                    preset.name
                )));
            }
            preset.optimizer.validate()?;
        }

        if let Some(w) = self.widths.iter().find(|&&w| w == 0) {
            return Err(Error::InvalidConfig(format!("widths must be > 0, got {w}")));
        }
        if let Some(d) = self
            .dropouts
            .iter()
            .find(|d| !(d.is_finite() && (0.0..1.0).contains(*d)))
        {
            return Err(Error::InvalidConfig(format!(
                "dropout rates must be finite and in [0,1), got {d}"
            )));
        }
        if self.trials == 0 || self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "trials, epochs and batch_size must be > 0, got {}, {}, {}",
                self.trials, self.epochs, self.batch_size
            )));
        }
        self.task.validate()
    }
}

/// Read a JSON sweep configuration and validate it.
pub fn load_config(path: &Path) -> Result<SweepConfig> {
    let content = fs::read_to_string(path)?;
    let config: SweepConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
