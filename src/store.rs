//! Idempotent job store for results tables.
//!
//! A table counts as finished only when a completion marker sits next to it
//! (`<table>.done`) and records the same configuration key as the job being
//! asked about. Tables are written to a temporary sibling and renamed into
//! place before the marker is written, so a crash leaves either no table, or a
//! table without a marker, which is treated as stale.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{Error, Result};

pub const MARKER_SUFFIX: &str = ".done";
const TMP_SUFFIX: &str = ".tmp";

/// Stable identity of a job: SHA-256 (hex) of its JSON encoding.
///
/// Field order comes from the type definition, so equal values always hash
/// the same.
pub fn config_key<T: Serialize>(job: &T) -> Result<String> {
    let bytes = serde_json::to_vec(job)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub key: String,
    pub trials: usize,
    pub epochs: usize,
    pub completed_at: DateTime<Utc>,
}

impl CompletionMarker {
    pub fn new(key: impl Into<String>, trials: usize, epochs: usize) -> Self {
        Self {
            key: key.into(),
            trials,
            epochs,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// No table on disk.
    Pending,
    /// Table present without a readable marker; left over from an interrupted run.
    Stale,
    /// Table finished for a different configuration key.
    Changed,
    /// Table finished for this key; nothing to do.
    Done,
}

impl JobStatus {
    #[inline]
    pub fn is_done(self) -> bool {
        self == JobStatus::Done
    }
}

pub fn marker_path(table: &Path) -> PathBuf {
    with_suffix(table, MARKER_SUFFIX)
}

/// Decide whether the table at `table` is complete for `key`.
pub fn status(table: &Path, key: &str) -> Result<JobStatus> {
    if !table.exists() {
        return Ok(JobStatus::Pending);
    }
    let marker = marker_path(table);
    if !marker.exists() {
        return Ok(JobStatus::Stale);
    }
    match serde_json::from_slice::<CompletionMarker>(&fs::read(&marker)?) {
        Ok(m) if m.key == key => Ok(JobStatus::Done),
        Ok(_) => Ok(JobStatus::Changed),
        Err(e) => {
            warn!(marker = %marker.display(), error = %e, "unreadable completion marker");
            Ok(JobStatus::Stale)
        }
    }
}

/// Drop the marker for `table` ahead of rewriting it.
pub fn clear(table: &Path) -> Result<()> {
    let marker = marker_path(table);
    if marker.exists() {
        fs::remove_file(marker)?;
    }
    Ok(())
}

pub fn mark_done(table: &Path, marker: &CompletionMarker) -> Result<()> {
    write_atomically(&marker_path(table), |w| {
        serde_json::to_writer_pretty(&mut *w, marker)?;
        w.write_all(b"\n")?;
        Ok(())
    })
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `path` through a temporary sibling that is renamed into place.
///
/// Parent directories are created as needed. On failure the temporary file is
/// removed and `path` is left untouched.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    ensure_parent_dir(path)?;
    let tmp = with_suffix(path, TMP_SUFFIX);

    let written = File::create(&tmp)
        .map_err(Error::from)
        .and_then(|file| {
            let mut w = BufWriter::new(file);
            write(&mut w)?;
            w.flush()?;
            Ok(())
        })
        .and_then(|()| Ok(fs::rename(&tmp, path)?));
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}
