use std::fmt::Display;

use thiserror::Error;

use crate::backend::spec::BackendError;

#[derive(Debug, Error)]
pub enum ConformanceError {
    /// Mutually exclusive or missing-precondition arguments.
    #[error("invalid test configuration: {0}")]
    Config(String),
    /// An expectation did not hold.
    #[error("unexpected {expectation}: expected {expected}, got {actual}")]
    Mismatch {
        expectation: String,
        expected: String,
        actual: String,
    },
    #[error("{0}")]
    Unsupported(String),
    /// Failure inside a layer, backend, serializer, or trainer, passed through unchanged.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type ConformanceResult<T> = Result<T, ConformanceError>;

impl ConformanceError {
    pub fn config(message: impl Into<String>) -> Self {
        ConformanceError::Config(message.into())
    }

    pub fn mismatch(
        expectation: impl Into<String>,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        ConformanceError::Mismatch {
            expectation: expectation.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Name of the violated expectation, if this is a mismatch.
    pub fn expectation(&self) -> Option<&str> {
        match self {
            ConformanceError::Mismatch { expectation, .. } => Some(expectation),
            _ => None,
        }
    }
}

impl From<BackendError> for ConformanceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unsupported { .. } => ConformanceError::Unsupported(err.to_string()),
            other => ConformanceError::Collaborator(other.into()),
        }
    }
}
