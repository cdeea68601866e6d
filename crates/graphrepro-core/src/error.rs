//! Error types for graph construction, execution and the backend contracts.
//!
//! This module provides error types using `thiserror`. `GraphError` covers
//! everything the crate can detect on its own; `BackendError` is what the
//! external collaborators (export, compile, load, execute) report.

use thiserror::Error;

/// Errors raised while building, validating, persisting or interpreting a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two placeholders or nodes share a name.
    #[error("duplicate name '{0}' in graph")]
    DuplicateName(String),

    /// A placeholder or node name is empty or contains whitespace.
    #[error("invalid name '{0}': names must be non-empty and contain no whitespace")]
    InvalidName(String),

    /// A node argument refers to a name that is not defined before it.
    #[error("node '{node}' refers to unknown value '{arg}'")]
    UnknownReference { node: String, arg: String },

    /// A node has the wrong number of arguments for its op.
    #[error("node '{node}': {op} expects {expected} argument(s), found {found}")]
    Arity {
        node: String,
        op: String,
        expected: usize,
        found: usize,
    },

    /// The graph declares no outputs.
    #[error("graph '{0}' has no outputs")]
    NoOutputs(String),

    /// An output refers to an undefined value.
    #[error("output '{0}' is not defined in the graph")]
    UnknownOutput(String),

    /// The number of call arguments does not match the placeholders.
    #[error("graph expects {expected} argument(s), got {found}")]
    ArgumentCount { expected: usize, found: usize },

    /// Tensor metadata is inconsistent.
    #[error("invalid tensor metadata: {0}")]
    InvalidMeta(String),

    /// A device string could not be parsed.
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// A dtype string could not be parsed.
    #[error("unknown dtype '{0}'")]
    UnknownDType(String),

    /// An operation could not be evaluated.
    #[error("{op} failed at node '{node}': {reason}")]
    Execution {
        node: String,
        op: String,
        reason: String,
    },

    /// Failed to serialize or deserialize a graph.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write a graph artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Creates a new execution error.
    pub fn execution(node: impl Into<String>, op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            node: node.into(),
            op: op.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by the export / compile / load / execute collaborators.
///
/// The `Display` form is the error's textual representation used when a
/// failure must match a `check_str` filter, so every variant leads with a
/// stable kind prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The graph could not be exported.
    #[error("ExportError: {0}")]
    Export(String),

    /// The compiler rejected or crashed on the graph.
    #[error("CompileError: {0}")]
    Compile(String),

    /// The compiled artifact could not be loaded.
    #[error("LoadError: {0}")]
    Load(String),

    /// The compiled artifact failed while executing.
    #[error("RuntimeError: {0}")]
    Runtime(String),
}

impl BackendError {
    /// Returns the message without its kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Export(m) | Self::Compile(m) | Self::Load(m) | Self::Runtime(m) => m,
        }
    }
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
