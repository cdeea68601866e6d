//! Error types for script assembly and parsing.

use graphrepro_codec::CodecError;
use graphrepro_core::GraphError;
use thiserror::Error;

/// Errors raised while assembling, writing or reading a repro script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The operation needs a save directory and none was given.
    #[error("a save directory is required to {0}")]
    MissingSaveDir(&'static str),

    /// The inputs do not match the graph's placeholders.
    #[error("graph takes {expected} input(s) but {found} were supplied")]
    Arity { expected: usize, found: usize },

    /// A script line could not be parsed.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The script lacks a required directive.
    #[error("script has no '{0}' directive")]
    MissingDirective(&'static str),

    #[error("input codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    pub fn parse(line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }
}

/// Result type alias for script operations.
pub type Result<T> = std::result::Result<T, ScriptError>;
