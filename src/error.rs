use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, configuring or running an experiment.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{path}:{line}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    Shape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("plot error: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, StudyError>;

impl StudyError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        StudyError::MalformedRow {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
