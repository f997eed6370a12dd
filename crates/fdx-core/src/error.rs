//! Kernel error types.

use thiserror::Error;

/// Errors raised by the pure kernels in this crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Arguments are out of range or contradictory.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A binary artifact could not be decoded.
    #[error("corrupt artifact: {0}")]
    Corrupt(String),

    /// An identifier string is not a valid opaque id.
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidInput(msg.into())
    }
}

/// Convenient Result type for kernel operations.
pub type CoreResult<T> = Result<T, CoreError>;
