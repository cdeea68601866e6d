//! # graphrepro-replay
//!
//! Replays repro units written by `graphrepro-report`.
//!
//! A replay parses the unit's script, decodes its inputs, re-exports the
//! graph and then runs one of four commands:
//!
//! | Command          | Effect                                              |
//! |------------------|-----------------------------------------------------|
//! | `run`            | compile, load and execute; any failure is fatal     |
//! | `get_args`       | return the exported graph and inputs, no compiling  |
//! | `minify`         | shrink the graph while the failure reproduces       |
//! | `minifier-query` | `run`, reporting whether the failure reproduced     |
//!
//! ## Example
//!
//! ```rust,ignore
//! use graphrepro_core::{ReferenceCompiler, ReferenceExporter, ReproCommand};
//! use graphrepro_replay::{ReplayDriver, ReplayOptions};
//! use graphrepro_report::ReproScript;
//!
//! let script = ReproScript::load(path)?;
//! let options = ReplayOptions::from_entry(&script.entry).with_device("cuda:0");
//! let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
//! let outcome = driver.replay(&script, &options, ReproCommand::Run)?;
//! ```

pub mod driver;
pub mod error;
pub mod minify;
pub mod options;
pub mod oracle;

pub use driver::{PreparedRepro, ReplayDriver, ReplayOutcome};
pub use error::{ReproError, Result};
pub use minify::{CheckpointDumper, MINIFIER_DIR};
pub use options::{validate_device, ReplayOptions};
pub use oracle::FailureOracle;
