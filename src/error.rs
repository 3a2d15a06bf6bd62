use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A results table was expected on disk but is absent.
    #[error("results table not found: {}", .0.display())]
    MissingTable(PathBuf),

    /// A results table whose columns do not pair up into train/validation curves.
    #[error("malformed results table: {0}")]
    MalformedTable(String),

    #[error("plot error: {0}")]
    Plot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
