//! Error types for sigma-shrink
//!
//! Only job-fatal conditions live here. Failures of a single image or a single
//! structural method are absorbed where they happen and never surface as a
//! `CompressError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("empty input")]
    EmptyInput,

    #[error("input too large: {size} bytes exceeds limit of {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("document is encrypted")]
    EncryptedDocument,

    #[error("document service unavailable: {0}")]
    DocumentServiceUnavailable(String),

    #[error("image codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("failed to save document: {0}")]
    SaveFailed(String),

    #[error("job was superseded by a newer request")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Stable, host-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyInput,
    InputTooLarge,
    MalformedDocument,
    EncryptedDocument,
    DocumentServiceUnavailable,
    CodecUnavailable,
    SaveFailed,
    Cancelled,
    Io,
    Serialization,
}

impl CompressError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput => ErrorKind::EmptyInput,
            Self::InputTooLarge { .. } => ErrorKind::InputTooLarge,
            Self::MalformedDocument(_) => ErrorKind::MalformedDocument,
            Self::EncryptedDocument => ErrorKind::EncryptedDocument,
            Self::DocumentServiceUnavailable(_) => ErrorKind::DocumentServiceUnavailable,
            Self::CodecUnavailable(_) => ErrorKind::CodecUnavailable,
            Self::SaveFailed(_) => ErrorKind::SaveFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IoError(_) => ErrorKind::Io,
            Self::SerializationError(_) => ErrorKind::Serialization,
        }
    }
}

impl From<serde_json::Error> for CompressError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable_on_the_wire() {
        let kind = CompressError::EncryptedDocument.kind();
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"encrypted_document\"");
    }

    #[test]
    fn test_too_large_message() {
        let err = CompressError::InputTooLarge { size: 20, limit: 10 };
        assert_eq!(err.kind(), ErrorKind::InputTooLarge);
        assert!(err.to_string().contains("20 bytes"));
    }
}
