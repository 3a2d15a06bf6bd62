//! Results tables: per-epoch losses of every trial of one configuration.
//!
//! On disk a table is CSV with an unnamed leading index column (the epoch),
//! then `loss_000 .. loss_{k-1}`, then `val_loss_000 .. val_loss_{k-1}`:
//!
//! ```text
//! ,loss_000,loss_001,val_loss_000,val_loss_001
//! 0,0.52,0.61,0.49,0.58
//! 1,0.31,0.40,0.30,0.37
//! ```
//!
//! Values are written in shortest round-trip form, so reading a table back
//! yields the exact `f32`s that were written. Non-finite losses are written as
//! `NaN` / `inf` / `-inf`; an empty cell reads back as `NaN`.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use crate::store::write_atomically;
use crate::{Error, History, Result};

pub fn loss_column(trial: usize) -> String {
    format!("loss_{trial:03}")
}

pub fn val_loss_column(trial: usize) -> String {
    format!("val_loss_{trial:03}")
}

/// Number of trials in a table with `columns` columns, index column included.
///
/// Every trial contributes exactly one training and one validation column, so
/// anything other than `2k + 1` columns (with `k >= 1`) is malformed.
pub fn trial_count(columns: usize) -> Result<usize> {
    let data = columns.saturating_sub(1);
    if data == 0 {
        return Err(Error::MalformedTable(format!(
            "expected an index column plus loss columns, got {columns} column(s)"
        )));
    }
    if !data.is_multiple_of(2) {
        return Err(Error::MalformedTable(format!(
            "{data} data columns cannot pair into train/validation curves"
        )));
    }
    Ok(data / 2)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    epochs: usize,
    loss: Vec<Vec<f32>>,
    val_loss: Vec<Vec<f32>>,
}

impl ResultsTable {
    /// Empty table whose trials will each have `epochs` rows.
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            loss: Vec::new(),
            val_loss: Vec::new(),
        }
    }

    /// Append one trial's curves; it gets the next trial index.
    pub fn push_trial(&mut self, history: &History) -> Result<()> {
        if history.loss.len() != self.epochs || history.val_loss.len() != self.epochs {
            return Err(Error::InvalidData(format!(
                "trial {} has {} loss / {} val_loss epochs, table expects {}",
                self.loss.len(),
                history.loss.len(),
                history.val_loss.len(),
                self.epochs
            )));
        }
        self.loss.push(history.loss.clone());
        self.val_loss.push(history.val_loss.clone());
        Ok(())
    }

    #[inline]
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    #[inline]
    pub fn trial_count(&self) -> usize {
        self.loss.len()
    }

    #[inline]
    pub fn loss(&self, trial: usize) -> &[f32] {
        &self.loss[trial]
    }

    #[inline]
    pub fn val_loss(&self, trial: usize) -> &[f32] {
        &self.val_loss[trial]
    }

    /// Header row, index column first.
    pub fn column_names(&self) -> Vec<String> {
        let k = self.trial_count();
        std::iter::once(String::new())
            .chain((0..k).map(loss_column))
            .chain((0..k).map(val_loss_column))
            .collect()
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(self.column_names())?;

        let mut record = Vec::with_capacity(1 + 2 * self.trial_count());
        for epoch in 0..self.epochs {
            record.clear();
            record.push(epoch.to_string());
            record.extend(self.loss.iter().map(|curve| curve[epoch].to_string()));
            record.extend(self.val_loss.iter().map(|curve| curve[epoch].to_string()));
            w.write_record(&record)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Write to `path`, creating parent directories. The file appears atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomically(path, |w| self.write_to(w))
    }

    pub fn read_from<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let k = trial_count(headers.len())?;

        for trial in 0..k {
            for (col, expected) in [
                (1 + trial, loss_column(trial)),
                (1 + k + trial, val_loss_column(trial)),
            ] {
                if headers.get(col) != Some(expected.as_str()) {
                    return Err(Error::MalformedTable(format!(
                        "column {col} is {:?}, expected {expected:?}",
                        headers.get(col).unwrap_or_default()
                    )));
                }
            }
        }

        let mut columns: Vec<Vec<f32>> = vec![Vec::new(); 2 * k];
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            for (col, values) in columns.iter_mut().enumerate() {
                let field = record.get(col + 1).unwrap_or_default().trim();
                let value = if field.is_empty() {
                    f32::NAN
                } else {
                    field.parse::<f32>().map_err(|e| {
                        Error::MalformedTable(format!(
                            "row {row} column {}: {field:?} is not a number ({e})",
                            col + 1
                        ))
                    })?
                };
                values.push(value);
            }
        }

        let epochs = columns.first().map_or(0, Vec::len);
        let val_loss = columns.split_off(k);
        Ok(Self {
            epochs,
            loss: columns,
            val_loss,
        })
    }

    /// Read the table at `path`; a missing file is [`Error::MissingTable`].
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingTable(path.to_path_buf()));
        }
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(loss: &[f32], val_loss: &[f32]) -> History {
        History {
            loss: loss.to_vec(),
            val_loss: val_loss.to_vec(),
        }
    }

    fn sample_table() -> ResultsTable {
        let mut table = ResultsTable::new(3);
        table
            .push_trial(&history(&[0.5, 0.25, 0.1], &[0.6, 0.3, 0.2]))
            .unwrap();
        table
            .push_trial(&history(&[1.5, f32::NAN, f32::INFINITY], &[0.7, 0.4, 1e-7]))
            .unwrap();
        table
    }

    #[test]
    fn writes_loss_columns_before_val_loss_columns() {
        let mut buf = Vec::new();
        sample_table().write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(",loss_000,loss_001,val_loss_000,val_loss_001")
        );
        assert_eq!(lines.next(), Some("0,0.5,1.5,0.6,0.7"));
        assert_eq!(lines.next(), Some("1,0.25,NaN,0.3,0.4"));
        assert_eq!(lines.next(), Some("2,0.1,inf,0.2,0.0000001"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn read_back_matches_what_was_written() {
        let table = sample_table();
        let mut buf = Vec::new();
        table.write_to(&mut buf).unwrap();
        let back = ResultsTable::read_from(buf.as_slice()).unwrap();

        assert_eq!(back.trial_count(), 2);
        assert_eq!(back.epochs(), 3);
        assert_eq!(back.column_names(), table.column_names());
        assert_eq!(back.loss(0), table.loss(0));
        assert_eq!(back.val_loss(1), table.val_loss(1));
        assert!(back.loss(1)[1].is_nan());
        assert_eq!(back.loss(1)[2], f32::INFINITY);
    }

    #[test]
    fn empty_cells_read_as_nan() {
        let csv = ",loss_000,val_loss_000\n0,,0.5\n";
        let table = ResultsTable::read_from(csv.as_bytes()).unwrap();
        assert!(table.loss(0)[0].is_nan());
        assert_eq!(table.val_loss(0), &[0.5]);
    }

    #[test]
    fn trial_count_requires_paired_columns() {
        assert_eq!(trial_count(21).unwrap(), 10);
        assert_eq!(trial_count(3).unwrap(), 1);
        assert!(matches!(trial_count(4), Err(Error::MalformedTable(_))));
        assert!(matches!(trial_count(1), Err(Error::MalformedTable(_))));
        assert!(matches!(trial_count(0), Err(Error::MalformedTable(_))));
    }

    #[test]
    fn foreign_or_odd_tables_are_rejected() {
        let odd = ",loss_000,val_loss_000,extra\n0,1,2,3\n";
        assert!(matches!(
            ResultsTable::read_from(odd.as_bytes()),
            Err(Error::MalformedTable(_))
        ));

        let swapped = ",val_loss_000,loss_000\n0,1,2\n";
        assert!(matches!(
            ResultsTable::read_from(swapped.as_bytes()),
            Err(Error::MalformedTable(_))
        ));

        let garbage = ",loss_000,val_loss_000\n0,abc,2\n";
        assert!(matches!(
            ResultsTable::read_from(garbage.as_bytes()),
            Err(Error::MalformedTable(_))
        ));
    }

    #[test]
    fn push_trial_rejects_wrong_epoch_count() {
        let mut table = ResultsTable::new(2);
        assert!(table.push_trial(&history(&[1.0], &[1.0])).is_err());
        assert!(table.push_trial(&history(&[1.0, 2.0], &[])).is_err());
        assert_eq!(table.trial_count(), 0);
    }

    #[test]
    fn missing_file_is_reported_as_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(matches!(ResultsTable::read(&path), Err(Error::MissingTable(p)) if p == path));
    }
}
