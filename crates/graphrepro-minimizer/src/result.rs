//! Result types for minimization.

use std::fmt;
use std::time::Duration;

use graphrepro_core::{Graph, Value};
use serde::{Deserialize, Serialize};

/// The smallest failing graph found, with its inputs.
#[derive(Debug, Clone)]
pub struct MinifiedGraph {
    pub graph: Graph,
    pub args: Vec<Value>,
    pub stats: MinimizationStats,
}

impl MinifiedGraph {
    pub fn original_size(&self) -> usize {
        self.stats.original_nodes
    }

    pub fn minimized_size(&self) -> usize {
        self.stats.minimized_nodes
    }

    /// Get the percentage reduction achieved.
    pub fn reduction_percentage(&self) -> f64 {
        if self.stats.original_nodes == 0 {
            return 0.0;
        }
        (1.0 - self.stats.minimized_nodes as f64 / self.stats.original_nodes as f64) * 100.0
    }
}

impl fmt::Display for MinifiedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MinifiedGraph {{ {} -> {} nodes ({:.1}% reduction), {} inputs }}",
            self.stats.original_nodes,
            self.stats.minimized_nodes,
            self.reduction_percentage(),
            self.args.len()
        )
    }
}

/// Statistics about the minimization process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinimizationStats {
    pub original_nodes: usize,
    pub minimized_nodes: usize,

    /// Number of predicate calls, including the sanity check.
    pub checks_performed: usize,

    /// Candidates that still failed and replaced the current graph.
    pub accepted_shrinks: usize,

    /// Candidates that no longer failed.
    pub rejected_candidates: usize,

    /// Number of times the chunk size was halved.
    pub granularity_steps: usize,

    /// Number of checkpoints written.
    pub dumps: usize,

    #[serde(skip)]
    pub duration: Option<Duration>,
}

impl MinimizationStats {
    pub fn new(original_nodes: usize) -> Self {
        Self {
            original_nodes,
            minimized_nodes: original_nodes,
            ..Default::default()
        }
    }

    pub fn record_check(&mut self) {
        self.checks_performed += 1;
    }

    pub fn record_accepted(&mut self, nodes: usize) {
        self.accepted_shrinks += 1;
        self.minimized_nodes = nodes;
    }

    pub fn record_rejected(&mut self) {
        self.rejected_candidates += 1;
    }

    pub fn record_granularity_step(&mut self) {
        self.granularity_steps += 1;
    }

    pub fn record_dump(&mut self) {
        self.dumps += 1;
    }
}

impl fmt::Display for MinimizationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ {} -> {} nodes, {} checks, {} accepted, {} rejected, {} dumps",
            self.original_nodes,
            self.minimized_nodes,
            self.checks_performed,
            self.accepted_shrinks,
            self.rejected_candidates,
            self.dumps
        )?;
        if let Some(duration) = self.duration {
            write!(f, ", {duration:?}")?;
        }
        write!(f, " }}")
    }
}
