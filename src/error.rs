use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Configuration: {0}")]
    Config(String),

    #[error("Split invariant violated: {0}")]
    DataInvariant(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Clustering output not found: {}", .0.display())]
    ClusterOutputMissing(PathBuf),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = SelectionError> = std::result::Result<T, E>;

#[cfg(feature = "python")]
impl From<SelectionError> for pyo3::PyErr {
    fn from(err: SelectionError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyRuntimeError, PyValueError};
        match err {
            SelectionError::Config(_) => PyValueError::new_err(err.to_string()),
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}
