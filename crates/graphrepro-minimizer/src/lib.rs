//! # graphrepro-minimizer
//!
//! Shrinks a failing graph to a smaller graph that still fails.
//!
//! The minimizer only knows about graphs and a failure predicate. Whether a
//! candidate "fails" (crash, accuracy mismatch, specific message) is decided
//! by the caller, and so is what a checkpoint looks like on disk.
//!
//! ## Example
//!
//! ```rust,ignore
//! use graphrepro_minimizer::{GranularityMinifier, Minifier, MinifierConfig};
//!
//! let config = MinifierConfig::new().with_max_granularity(Some(8));
//! let result = GranularityMinifier::new().minify(
//!     &graph,
//!     &args,
//!     &config,
//!     &|g: &Graph, a: &[Value]| oracle.module_fails(g, a, None),
//!     &mut |g: &Graph, a: &[Value]| dumper.dump(g, a),
//! )?;
//!
//! println!("{}", result);
//! ```
//!
//! Removed producers whose values are still read become new graph inputs,
//! fed with the value the uncompiled graph computed for them. Those values
//! live in memory by default or under `<save_dir>/offload` when
//! `offload_to_disk` is set.

pub mod error;
pub mod granularity;
pub mod intermediates;
pub mod result;
pub mod subgraph;
pub mod traits;

pub use error::{MinimizerError, Result};
pub use granularity::GranularityMinifier;
pub use intermediates::IntermediateStore;
pub use result::{MinifiedGraph, MinimizationStats};
pub use subgraph::{extract, Candidate};
pub use traits::{DumpState, FailurePredicate, Minifier, MinifierConfig, OFFLOAD_DIR};
