//! Error type shared by every pipeline stage.
//!
//! Stage operations return [`PipelineResult`]. The CLI converts these into
//! `anyhow` errors at the edge; library callers can match on the variant.

use std::path::{Path, PathBuf};

use fdx_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A dataset or model id does not resolve (never created, deleted, or
    /// the model's dataset was deleted).
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Caller-supplied parameters were rejected before anything was written.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Feature extraction failed, or its status record is missing or
    /// inconsistent.
    #[error("feature extraction for dataset '{dsid}' failed: {message}")]
    ProcessingFailure { dsid: String, message: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An artifact exists but cannot be decoded.
    #[error("corrupt artifact {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration(msg.into())
    }

    pub fn dataset_not_found(id: impl ToString) -> Self {
        PipelineError::NotFound {
            kind: "dataset",
            id: id.to_string(),
        }
    }

    pub fn model_not_found(id: impl ToString) -> Self {
        PipelineError::NotFound {
            kind: "model",
            id: id.to_string(),
        }
    }

    pub fn corrupt(path: &Path, err: CoreError) -> Self {
        PipelineError::Corrupt {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound { .. })
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => PipelineError::InvalidConfiguration(msg),
            CoreError::InvalidId(id) => {
                PipelineError::InvalidConfiguration(format!("invalid identifier '{}'", id))
            }
            CoreError::Corrupt(message) => PipelineError::Corrupt {
                path: PathBuf::new(),
                message,
            },
        }
    }
}
