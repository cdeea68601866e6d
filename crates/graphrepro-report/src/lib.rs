//! graphrepro Report - Repro script assembly.
//!
//! Turns a failing (graph, inputs) pair into a self-contained repro unit on
//! disk and reads such units back.
//!
//! - [`assembler`]: `ReproScriptAssembler`, `ReproRequest`, `ReproUnit`
//! - [`script`]: `ReproScript` parser and the `run_repro` entry point
//! - [`environment`]: host and device facts for the script header

pub mod assembler;
pub mod environment;
pub mod error;
pub mod script;

pub use assembler::{checkpoint_dir, AssemblerConfig, ReproRequest, ReproScriptAssembler, ReproUnit, CHECKPOINT_DIR};
pub use environment::DeviceInfo;
pub use error::{Result, ScriptError};
pub use script::{EntryPoint, ReproScript, GRAPH_FILE, SCRIPT_FILE, SHEBANG};
