//! Status codes returned across the C boundary and the error type they are
//! derived from.
use thiserror::Error;

use crate::embedder::EmbedderError;

/// Status codes returned by the `embedder_*` functions.
///
/// The numeric values are part of the ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderStatus {
    Success = 0,
    NullPointer = 1,
    InvalidEncoding = 2,
    InitializationFailed = 3,
    EmbeddingFailed = 4,
    InvalidHandle = 5,
    BufferTooSmall = 6,
}

/// A failed boundary call. `Display` is the message recorded on the handle.
#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("null pointer: {0}")]
    NullPointer(String),

    #[error("invalid UTF-8 in {what}: {source}")]
    InvalidEncoding {
        what: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid handle")]
    InvalidHandle,

    #[error("buffer too small: need {required} floats but capacity is {capacity}")]
    BufferTooSmall { required: usize, capacity: usize },
}

impl BoundaryError {
    #[must_use]
    pub fn status(&self) -> EmbedderStatus {
        match self {
            Self::NullPointer(_) => EmbedderStatus::NullPointer,
            Self::InvalidEncoding { .. } => EmbedderStatus::InvalidEncoding,
            Self::InitializationFailed(_) => EmbedderStatus::InitializationFailed,
            Self::EmbeddingFailed(_) => EmbedderStatus::EmbeddingFailed,
            Self::InvalidHandle => EmbedderStatus::InvalidHandle,
            Self::BufferTooSmall { .. } => EmbedderStatus::BufferTooSmall,
        }
    }

    /// Attach the batch position of the text that caused the failure.
    #[must_use]
    pub fn at_index(self, index: usize) -> Self {
        match self {
            Self::EmbeddingFailed(msg) => Self::EmbeddingFailed(format!("text {index}: {msg}")),
            other => other,
        }
    }
}

impl From<EmbedderError> for BoundaryError {
    fn from(err: EmbedderError) -> Self {
        Self::EmbeddingFailed(err.to_string())
    }
}

impl From<Result<(), BoundaryError>> for EmbedderStatus {
    fn from(result: Result<(), BoundaryError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(err) => err.status(),
        }
    }
}
