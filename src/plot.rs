//! Loss-curve images for results tables.
//!
//! One PNG per table, beside it (`<table>.png`): the natural log of every
//! trial's training loss in blue and validation loss in green, against the
//! epoch index, on shared axes. Non-finite points (diverged runs, `ln(0)`)
//! are left out and break the line.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::debug;

use crate::store::ensure_parent_dir;
use crate::table::ResultsTable;
use crate::{Error, Result};

pub const IMAGE_SUFFIX: &str = ".png";
pub const IMAGE_SIZE: (u32, u32) = (640, 480);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveKind {
    Train,
    Validation,
}

impl CurveKind {
    fn color(self) -> RGBColor {
        match self {
            CurveKind::Train => BLUE,
            CurveKind::Validation => GREEN,
        }
    }
}

/// One plotted line: `(epoch, ln(loss))` points of a single trial.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCurve {
    pub kind: CurveKind,
    pub trial: usize,
    pub points: Vec<(f32, f32)>,
}

impl LogCurve {
    fn new(kind: CurveKind, trial: usize, losses: &[f32]) -> Self {
        Self {
            kind,
            trial,
            points: losses
                .iter()
                .enumerate()
                .map(|(epoch, loss)| (epoch as f32, loss.ln()))
                .collect(),
        }
    }

    /// Runs of consecutive finite points.
    fn segments(&self) -> impl Iterator<Item = &[(f32, f32)]> {
        self.points
            .split(|(_, y)| !y.is_finite())
            .filter(|run| !run.is_empty())
    }
}

/// Image path for the table at `table_path`: the table path with `.png` appended.
pub fn image_path(table_path: &Path) -> PathBuf {
    let mut s = table_path.as_os_str().to_owned();
    s.push(IMAGE_SUFFIX);
    PathBuf::from(s)
}

/// The `2 * trial_count` curves drawn for `table`, training curves first.
pub fn log_curves(table: &ResultsTable) -> Vec<LogCurve> {
    let k = table.trial_count();
    (0..k)
        .map(|trial| LogCurve::new(CurveKind::Train, trial, table.loss(trial)))
        .chain((0..k).map(|trial| LogCurve::new(CurveKind::Validation, trial, table.val_loss(trial))))
        .collect()
}

/// Render the table at `table_path` and return the image path.
///
/// The table must exist ([`Error::MissingTable`] otherwise) and be well formed.
/// The image is always redrawn, even if one already exists.
pub fn render(table_path: &Path) -> Result<PathBuf> {
    let table = ResultsTable::read(table_path)?;
    let image = image_path(table_path);
    ensure_parent_dir(&image)?;

    let curves = log_curves(&table);
    draw(&curves, table.epochs(), &image)?;
    debug!(
        image = %image.display(),
        trials = table.trial_count(),
        curves = curves.len(),
        "rendered loss curves"
    );
    Ok(image)
}

fn draw(curves: &[LogCurve], epochs: usize, image: &Path) -> Result<()> {
    let (y_min, y_max) = y_range(curves);
    let x_max = epochs.saturating_sub(1).max(1) as f32;

    // The backend is released when `root` drops, on success and error alike.
    let root = BitMapBackend::new(image, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0.0_f32..x_max, y_min..y_max)
        .map_err(plot_error)?;

    for curve in curves {
        let color = curve.kind.color();
        for segment in curve.segments() {
            chart
                .draw_series(LineSeries::new(segment.iter().copied(), &color))
                .map_err(plot_error)?;
        }
    }

    root.present().map_err(plot_error)?;
    Ok(())
}

fn y_range(curves: &[LogCurve]) -> (f32, f32) {
    let (lo, hi) = curves
        .iter()
        .flat_map(|c| c.points.iter().map(|&(_, y)| y))
        .filter(|y| y.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(y), hi.max(y))
        });
    if !(lo.is_finite() && hi.is_finite()) {
        return (0.0, 1.0);
    }
    if hi - lo < f32::EPSILON {
        return (lo - 0.5, hi + 0.5);
    }
    (lo, hi)
}

fn plot_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Plot(e.to_string())
}
