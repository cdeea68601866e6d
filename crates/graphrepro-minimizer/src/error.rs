//! Error types for the minimizer.

use graphrepro_codec::CodecError;
use graphrepro_core::GraphError;
use thiserror::Error;

/// Errors that can occur during graph minimization.
#[derive(Debug, Error)]
pub enum MinimizerError {
    /// The graph has no nodes to remove.
    #[error("Cannot minimize a graph with no nodes")]
    EmptyGraph,

    /// The starting graph does not fail (nothing to minimize).
    #[error("Input graph did not fail the tester")]
    NoFailure,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The uncompiled graph could not be run to record intermediates.
    #[error("Eager run of the original graph failed: {0}")]
    Eager(String),

    /// The checkpoint callback failed.
    #[error("Failed to dump minifier state: {0}")]
    Dump(String),

    /// Offloading or reloading an intermediate failed.
    #[error("Intermediate store error: {0}")]
    Codec(#[from] CodecError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Result type alias for minimizer operations.
pub type Result<T> = std::result::Result<T, MinimizerError>;
