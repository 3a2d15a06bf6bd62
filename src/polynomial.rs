//! Polynomial regression task: the dataset every trial in a sweep shares.
//!
//! Inputs are sampled uniformly from `[-1, 1]^input_dim`; the target is a fixed
//! random polynomial (per input dimension, summed) plus bounded uniform noise.
//! All `train_len + val_len + test_len` samples come from one seeded draw and are
//! split in order, so the three parts are disjoint and cover every sample.
//!
//! [`DatasetCache`] generates the split on first use, persists it as JSON and
//! afterwards only ever reloads it.

use std::cell::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{self, write_atomically};
use crate::{Dataset, DatasetSplit, Error, Result};

pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolynomialTask {
    pub input_dim: usize,
    pub degree: usize,
    pub train_len: usize,
    pub val_len: usize,
    pub test_len: usize,
    /// Half-width of the uniform noise added to each target.
    pub noise: f32,
    pub seed: u64,
}

impl Default for PolynomialTask {
    fn default() -> Self {
        Self {
            input_dim: 1,
            degree: 3,
            train_len: 1024,
            val_len: 256,
            test_len: 256,
            noise: 0.01,
            seed: 0,
        }
    }
}

impl PolynomialTask {
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(Error::InvalidConfig("task input_dim must be > 0".to_owned()));
        }
        if self.train_len == 0 || self.val_len == 0 || self.test_len == 0 {
            return Err(Error::InvalidConfig(format!(
                "task split sizes must be > 0, got train={} val={} test={}",
                self.train_len, self.val_len, self.test_len
            )));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "task noise must be finite and >= 0, got {}",
                self.noise
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.train_len + self.val_len + self.test_len
    }

    /// Draw a fresh split. Deterministic for a given task (including `seed`).
    pub fn generate(&self) -> Result<DatasetSplit> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        // coefficients[d][k] multiplies x_d^k
        let coefficients: Vec<Vec<f32>> = (0..self.input_dim)
            .map(|_| {
                (0..=self.degree)
                    .map(|_| rng.gen_range(-1.0_f32..=1.0))
                    .collect()
            })
            .collect();

        let n = self.sample_count();
        let mut inputs = Vec::with_capacity(n * self.input_dim);
        let mut targets = Vec::with_capacity(n);
        for _ in 0..n {
            let mut y = 0.0_f32;
            for coeffs in &coefficients {
                let x = rng.gen_range(-1.0_f32..=1.0);
                inputs.push(x);
                // Horner's rule, highest power first.
                y += coeffs.iter().rev().fold(0.0_f32, |acc, &c| acc.mul_add(x, c));
            }
            if self.noise > 0.0 {
                y += rng.gen_range(-self.noise..=self.noise);
            }
            targets.push(y);
        }

        let all = Dataset::from_flat(inputs, targets, self.input_dim, 1)?;
        let val_start = self.train_len;
        let test_start = val_start + self.val_len;
        DatasetSplit::new(
            all.slice(0, val_start)?,
            all.slice(val_start, test_start)?,
            all.slice(test_start, n)?,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSplit {
    format_version: u32,
    task: PolynomialTask,
    train: CachedDataset,
    val: CachedDataset,
    test: CachedDataset,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedDataset {
    input_dim: usize,
    target_dim: usize,
    inputs: Vec<f32>,
    targets: Vec<f32>,
}

impl From<&Dataset> for CachedDataset {
    fn from(ds: &Dataset) -> Self {
        Self {
            input_dim: ds.input_dim(),
            target_dim: ds.target_dim(),
            inputs: ds.inputs().as_flat().to_vec(),
            targets: ds.targets_flat().to_vec(),
        }
    }
}

impl CachedDataset {
    fn into_dataset(self) -> Result<Dataset> {
        Dataset::from_flat(self.inputs, self.targets, self.input_dim, self.target_dim)
    }
}

/// A split together with the fingerprint of its samples.
#[derive(Debug, Clone, PartialEq)]
struct LoadedSplit {
    split: DatasetSplit,
    fingerprint: String,
}

/// SHA-256 over the samples alone; task settings and format version are not
/// part of it, so equal data always has an equal fingerprint.
fn fingerprint(
    train: &CachedDataset,
    val: &CachedDataset,
    test: &CachedDataset,
) -> Result<String> {
    store::config_key(&[train, val, test])
}

/// Load the split cached at `path`, or generate it from `task` and cache it there.
///
/// An existing cache always wins: it is never re-sampled, even if `task` changed.
fn generate_or_load(path: &Path, task: &PolynomialTask) -> Result<LoadedSplit> {
    if path.exists() {
        debug!(path = %path.display(), "loading cached dataset");
        let cached: CachedSplit = serde_json::from_slice(&fs::read(path)?)?;
        if cached.format_version != CACHE_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported dataset cache format_version {}; expected {}",
                cached.format_version, CACHE_FORMAT_VERSION
            )));
        }
        if cached.task != *task {
            warn!(
                path = %path.display(),
                "cached dataset was generated from different task settings; using the cache"
            );
        }
        let fingerprint = fingerprint(&cached.train, &cached.val, &cached.test)?;
        let split = DatasetSplit::new(
            cached.train.into_dataset()?,
            cached.val.into_dataset()?,
            cached.test.into_dataset()?,
        )?;
        return Ok(LoadedSplit { split, fingerprint });
    }

    let split = task.generate()?;
    let cached = CachedSplit {
        format_version: CACHE_FORMAT_VERSION,
        task: *task,
        train: (&split.train).into(),
        val: (&split.val).into(),
        test: (&split.test).into(),
    };
    write_atomically(path, |w| Ok(serde_json::to_writer(w, &cached)?))?;
    info!(
        path = %path.display(),
        train = split.train.len(),
        val = split.val.len(),
        test = split.test.len(),
        "generated dataset"
    );
    let fingerprint = fingerprint(&cached.train, &cached.val, &cached.test)?;
    Ok(LoadedSplit { split, fingerprint })
}

/// Handle to a shared dataset split, initialized on first use.
///
/// One cache is created per sweep and lent to every trial runner; the split is
/// read-only once loaded.
#[derive(Debug)]
pub struct DatasetCache {
    path: PathBuf,
    task: PolynomialTask,
    loaded: OnceCell<LoadedSplit>,
}

impl DatasetCache {
    pub fn new(path: impl Into<PathBuf>, task: PolynomialTask) -> Self {
        Self {
            path: path.into(),
            task,
            loaded: OnceCell::new(),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The split, loading or generating it on the first call.
    pub fn get(&self) -> Result<&DatasetSplit> {
        Ok(&self.load()?.split)
    }

    /// SHA-256 (hex) of the samples in the split, loading it if needed.
    ///
    /// Identifies the data trials actually train on, whatever `task` says.
    pub fn fingerprint(&self) -> Result<&str> {
        Ok(&self.load()?.fingerprint)
    }

    fn load(&self) -> Result<&LoadedSplit> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded);
        }
        let loaded = generate_or_load(&self.path, &self.task)?;
        Ok(self.loaded.get_or_init(|| loaded))
    }
}
