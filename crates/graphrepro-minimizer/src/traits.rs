//! Core traits and configuration for graph minimization.

use std::path::{Path, PathBuf};

use graphrepro_core::{Graph, Value};

use crate::error::{MinimizerError, Result};
use crate::result::MinifiedGraph;

/// Directory under the save directory used for offloaded intermediates.
pub const OFFLOAD_DIR: &str = "offload";

/// Configuration for minimization behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinifierConfig {
    /// Where checkpoints and offloaded intermediates go.
    pub save_dir: Option<PathBuf>,

    /// Keep eager intermediates on disk instead of in memory.
    pub offload_to_disk: bool,

    /// Offload intermediates as metadata plus a random recipe, not data.
    pub skip_saving_eager_intermediates: bool,

    /// Skip checking that the unshrunk graph fails before searching.
    pub skip_sanity: bool,

    /// Starting chunk size; must be a power of two.
    pub max_granularity: Option<usize>,
}

impl MinifierConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_dir(mut self, save_dir: Option<PathBuf>) -> Self {
        self.save_dir = save_dir;
        self
    }

    pub fn with_offload_to_disk(mut self, enabled: bool) -> Self {
        self.offload_to_disk = enabled;
        self
    }

    pub fn with_skip_saving_eager_intermediates(mut self, enabled: bool) -> Self {
        self.skip_saving_eager_intermediates = enabled;
        self
    }

    pub fn with_skip_sanity(mut self, enabled: bool) -> Self {
        self.skip_sanity = enabled;
        self
    }

    pub fn with_max_granularity(mut self, granularity: Option<usize>) -> Self {
        self.max_granularity = granularity;
        self
    }

    /// Offload directory, when offloading is enabled.
    pub fn offload_dir(&self) -> Option<PathBuf> {
        match (&self.save_dir, self.offload_to_disk) {
            (Some(dir), true) => Some(dir.join(OFFLOAD_DIR)),
            _ => None,
        }
    }

    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(granularity) = self.max_granularity {
            if !granularity.is_power_of_two() {
                return Err(MinimizerError::InvalidConfig(format!(
                    "max_granularity must be a power of two, got {granularity}"
                )));
            }
        }
        if self.offload_to_disk && self.save_dir.is_none() {
            return Err(MinimizerError::InvalidConfig(
                "offload_to_disk requires a save directory".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides whether a candidate still exhibits the failure.
pub trait FailurePredicate {
    fn fails(&self, graph: &Graph, args: &[Value]) -> bool;
}

impl<F> FailurePredicate for F
where
    F: Fn(&Graph, &[Value]) -> bool,
{
    fn fails(&self, graph: &Graph, args: &[Value]) -> bool {
        self(graph, args)
    }
}

/// Checkpoint callback invoked with every state worth preserving.
pub trait DumpState {
    fn dump_state(&mut self, graph: &Graph, args: &[Value]) -> Result<()>;
}

impl<F> DumpState for F
where
    F: FnMut(&Graph, &[Value]) -> Result<()>,
{
    fn dump_state(&mut self, graph: &Graph, args: &[Value]) -> Result<()> {
        self(graph, args)
    }
}

/// A strategy for shrinking a failing graph.
///
/// The minimizer owns the search order. Callers only supply the failure
/// predicate, the checkpoint callback and the configuration.
pub trait Minifier {
    /// Shrinks `graph` while `predicate` keeps failing.
    ///
    /// # Errors
    ///
    /// * `MinimizerError::InvalidConfig` - The configuration is invalid.
    /// * `MinimizerError::NoFailure` - Sanity checking is on and `graph` does not fail.
    /// * `MinimizerError::EmptyGraph` - There are no nodes to remove.
    fn minify(
        &self,
        graph: &Graph,
        args: &[Value],
        config: &MinifierConfig,
        predicate: &dyn FailurePredicate,
        dump: &mut dyn DumpState,
    ) -> Result<MinifiedGraph>;

    fn name(&self) -> &str;
}
