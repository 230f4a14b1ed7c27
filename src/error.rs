use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal pipeline failures. Unresolved joins and bad numeric cells are not
/// errors; they end up in the missing-records list or are coerced to zero.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required input '{}' does not exist", path.display())]
    MissingFile { path: PathBuf },
    #[error("input '{}' is missing required column '{column}'", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("failed to read CSV '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse JSON '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unknown metric kind '{0}'")]
    UnknownMetric(String),
    #[error("sanity check failed: {0}")]
    Sanity(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PipelineError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }
}
