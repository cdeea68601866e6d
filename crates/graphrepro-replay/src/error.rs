//! Error types for replaying repro units.

use graphrepro_codec::CodecError;
use graphrepro_core::{BackendError, GraphError};
use graphrepro_minimizer::MinimizerError;
use graphrepro_report::ScriptError;
use thiserror::Error;

/// Errors that end a replay.
#[derive(Debug, Error)]
pub enum ReproError {
    /// The requested device is neither `cpu` nor a known accelerator.
    #[error("Unsupported device '{0}': expected 'cpu' or a device starting with 'cuda'")]
    UnsupportedDevice(String),

    /// The module could not be exported, so there is nothing to replay.
    #[error("Failed to export the repro module: {0}")]
    Export(BackendError),

    /// Compiling, loading or running the compiled artifact failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// Compiled output disagrees with the uncompiled module.
    #[error("Accuracy checking failed: compiled output differs from eager output beyond tolerance")]
    AccuracyMismatch,

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Input decoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Minification failed: {0}")]
    Minimizer(#[from] MinimizerError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReproError {
    /// Returns true for errors that mean the repro reproduced its failure.
    pub fn is_repro_failure(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::AccuracyMismatch)
    }
}

/// Result type alias for replay operations.
pub type Result<T> = std::result::Result<T, ReproError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_message_is_distinct() {
        let accuracy = ReproError::AccuracyMismatch.to_string();
        let crash = ReproError::Backend(BackendError::Runtime("boom".into())).to_string();
        assert!(accuracy.contains("Accuracy checking failed"));
        assert_eq!(crash, "RuntimeError: boom");
    }

    #[test]
    fn test_repro_failure_kinds() {
        assert!(ReproError::AccuracyMismatch.is_repro_failure());
        assert!(ReproError::Backend(BackendError::Compile("x".into())).is_repro_failure());
        assert!(!ReproError::Export(BackendError::Export("x".into())).is_repro_failure());
        assert!(!ReproError::UnsupportedDevice("tpu".into()).is_repro_failure());
    }
}
