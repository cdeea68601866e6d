//! Error types for the input codec.

use std::path::PathBuf;

use graphrepro_core::GraphError;
use thiserror::Error;

/// Errors raised while encoding or decoding input statements.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A known statement keyword with a body that cannot be parsed.
    #[error("line {line}: malformed '{keyword}' statement: {reason}")]
    Malformed {
        line: usize,
        keyword: String,
        reason: String,
    },

    /// A storage side file exists but has the wrong size.
    #[error("storage file {} holds {found} byte(s), expected {expected}", path.display())]
    StorageSize {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// The decoded tensor metadata is inconsistent.
    #[error("invalid tensor: {0}")]
    Tensor(#[from] GraphError),

    #[error("invalid inline data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn malformed(line: usize, keyword: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            keyword: keyword.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
