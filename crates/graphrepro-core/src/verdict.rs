//! Failure classification produced by a replay.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of compiling and running a graph once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureVerdict {
    NoFailure,
    /// The compiler or the compiled artifact raised; holds the error text.
    Crash(String),
    /// Compiled output disagrees with eager output beyond tolerance.
    AccuracyMismatch,
}

impl FailureVerdict {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::NoFailure)
    }

    /// Returns true if the failure text contains `needle`.
    ///
    /// With no needle every failure matches.
    pub fn matches(&self, needle: Option<&str>) -> bool {
        match (self, needle) {
            (Self::NoFailure, _) => false,
            (_, None) => true,
            (Self::Crash(text), Some(needle)) => text.contains(needle),
            (Self::AccuracyMismatch, Some(needle)) => "AccuracyError".contains(needle),
        }
    }
}

impl fmt::Display for FailureVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFailure => f.write_str("no failure"),
            Self::Crash(text) => write!(f, "crash: {text}"),
            Self::AccuracyMismatch => f.write_str("accuracy mismatch"),
        }
    }
}
