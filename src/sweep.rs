//! Sweep driver.
//!
//! Enumerates optimizer presets x widths x dropout rates x layer-norm flags
//! (in that nesting order), and for each configuration runs the trials and
//! renders the loss curves. Configurations are independent: one failing is
//! logged and recorded, and the sweep moves on. Only a dataset failure stops
//! the whole sweep, since every configuration trains on the same split.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::{OptimizerPreset, SweepConfig};
use crate::plot;
use crate::polynomial::DatasetCache;
use crate::trials::{TrialJob, TrialOutcome, run_trials};
use crate::{Error, Result};

/// One point of the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub optimizer: OptimizerPreset,
    pub width: usize,
    pub dropout_rate: f32,
    pub layer_norm: bool,
}

impl Configuration {
    /// `<prefix>-<width>-<optimizer>[-dropout][-layernorm].csv`
    pub fn file_name(&self, prefix: &str) -> String {
        let mut name = format!("{prefix}-{}-{}", self.width, self.optimizer.name);
        if self.dropout_rate > 0.0 {
            name.push_str("-dropout");
        }
        if self.layer_norm {
            name.push_str("-layernorm");
        }
        name.push_str(".csv");
        name
    }
}

/// Results table path for `configuration`. A pure function of its arguments.
pub fn output_path(base_dir: &Path, prefix: &str, configuration: &Configuration) -> PathBuf {
    base_dir.join(configuration.file_name(prefix))
}

/// All configurations of `config`, in sweep order.
pub fn configurations(config: &SweepConfig) -> Vec<Configuration> {
    let mut out = Vec::with_capacity(config.configuration_count());
    for preset in &config.optimizers {
        for &width in &config.widths {
            for &dropout_rate in &config.dropouts {
                for &layer_norm in &config.layer_norm {
                    out.push(Configuration {
                        optimizer: preset.clone(),
                        width,
                        dropout_rate,
                        layer_norm,
                    });
                }
            }
        }
    }
    out
}

#[derive(Debug)]
pub struct ConfigurationFailure {
    pub path: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Tables that exist and are plotted after the sweep, in sweep order.
    pub paths: Vec<PathBuf>,
    pub trained: usize,
    pub skipped: usize,
    pub failures: Vec<ConfigurationFailure>,
}

impl SweepReport {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every configuration of `config`.
///
/// Returns `Err` only for problems that affect the sweep as a whole: an
/// invalid config, colliding output paths, or an unusable dataset. Failures
/// of individual configurations are reported in [`SweepReport::failures`].
pub fn run_sweep(config: &SweepConfig) -> Result<SweepReport> {
    config.validate()?;
    let configurations = configurations(config);
    let paths: Vec<PathBuf> = configurations
        .iter()
        .map(|c| output_path(&config.base_dir, &config.file_prefix, c))
        .collect();
    ensure_unique(&paths)?;

    let datasets = DatasetCache::new(config.dataset_path(), config.task);
    datasets.get()?;

    info!(
        configurations = configurations.len(),
        base_dir = %config.base_dir.display(),
        "starting sweep"
    );

    let mut report = SweepReport::default();
    for (configuration, path) in configurations.iter().zip(paths) {
        match run_configuration(config, &datasets, configuration, &path) {
            Ok(TrialOutcome::Skipped) => {
                report.skipped += 1;
                report.paths.push(path);
            }
            Ok(TrialOutcome::Completed { .. }) => {
                report.trained += 1;
                report.paths.push(path);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "configuration failed; continuing");
                report.failures.push(ConfigurationFailure { path, error: e });
            }
        }
    }

    info!(
        trained = report.trained,
        skipped = report.skipped,
        failed = report.failures.len(),
        "sweep finished"
    );
    Ok(report)
}

fn run_configuration(
    config: &SweepConfig,
    datasets: &DatasetCache,
    configuration: &Configuration,
    path: &Path,
) -> Result<TrialOutcome> {
    let job = TrialJob {
        width: configuration.width,
        dropout_rate: configuration.dropout_rate,
        layer_norm: configuration.layer_norm,
        trials: config.trials,
        epochs: config.epochs,
        batch_size: config.batch_size,
        loss: config.loss,
        seed: config.seed,
    };
    let optimizer = configuration.optimizer.optimizer;
    let outcome = run_trials(path, datasets, || optimizer, &job)?;
    plot::render(path)?;
    Ok(outcome)
}

fn ensure_unique(paths: &[PathBuf]) -> Result<()> {
    let mut seen = HashSet::with_capacity(paths.len());
    for path in paths {
        if !seen.insert(path) {
            return Err(Error::InvalidConfig(format!(
                "two configurations share the output path {}",
                path.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Optimizer;

    fn configuration(dropout_rate: f32, layer_norm: bool) -> Configuration {
        Configuration {
            optimizer: OptimizerPreset::new("sgd-1e1", Optimizer::sgd(0.1)),
            width: 64,
            dropout_rate,
            layer_norm,
        }
    }

    #[test]
    fn file_names_encode_the_configuration() {
        let base = Path::new("output/polynomial");
        assert_eq!(
            output_path(base, "polynomial", &configuration(0.0, false)),
            PathBuf::from("output/polynomial/polynomial-64-sgd-1e1.csv")
        );
        assert_eq!(
            configuration(0.5, false).file_name("polynomial"),
            "polynomial-64-sgd-1e1-dropout.csv"
        );
        assert_eq!(
            configuration(0.5, true).file_name("polynomial"),
            "polynomial-64-sgd-1e1-dropout-layernorm.csv"
        );
        assert_eq!(
            configuration(0.0, true).file_name("p"),
            "p-64-sgd-1e1-layernorm.csv"
        );
    }

    #[test]
    fn enumeration_nests_optimizer_width_dropout_layernorm() {
        let config = SweepConfig::default();
        let all = configurations(&config);
        assert_eq!(all.len(), 100);
        assert_eq!(all[0], configuration(0.0, false));
        assert_eq!(all[1], configuration(0.0, true));
        assert_eq!(all[2], configuration(0.5, false));
        assert_eq!(all[4].width, 128);
        assert_eq!(all[20].optimizer.name, "sgd-1e2");
    }

    #[test]
    fn colliding_paths_are_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            base_dir: dir.path().to_path_buf(),
            dropouts: vec![0.25, 0.5],
            ..SweepConfig::default()
        };
        assert!(matches!(run_sweep(&config), Err(Error::InvalidConfig(_))));
        assert!(!config.dataset_path().exists());
    }
}
