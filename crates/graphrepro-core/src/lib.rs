//! graphrepro Core - Core types for the graph repro harness.
//!
//! This crate provides the fundamental types shared by every stage of the
//! capture / replay / minimize pipeline:
//!
//! - [`graph`]: The frozen computational graph (`Graph`, `Node`, `OpKind`)
//! - [`value`]: Runtime values fed to graph placeholders (`Value`, `Tensor`, `SymInt`)
//! - [`interp`]: A reference interpreter that executes graphs eagerly
//! - [`backend`]: Contracts for the export / compile / load / compare collaborators
//! - [`reference`]: An interpreter-backed implementation of those contracts
//! - [`command`]: The replay command vocabulary and accuracy modes
//! - [`verdict`]: The failure classification produced by replays
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use graphrepro_core::graph::{Graph, OpKind};
//! use graphrepro_core::interp::Interpreter;
//! use graphrepro_core::value::{DType, Device, Tensor, Value};
//!
//! let graph = Graph::new("double")
//!     .with_placeholder("x")
//!     .with_node("y", OpKind::Add, ["x", "x"])
//!     .with_output("y");
//!
//! let x = Tensor::from_values(vec![2], &[1.0, 2.0], DType::F32, Device::Cpu).unwrap();
//! let outputs = Interpreter::new(&graph).run(&[Value::Tensor(x)]).unwrap();
//!
//! assert_eq!(outputs[0].as_tensor().unwrap().to_f64_vec(), vec![2.0, 4.0]);
//! ```

pub mod backend;
pub mod command;
pub mod error;
pub mod graph;
pub mod interp;
pub mod reference;
pub mod value;
pub mod verdict;

// Re-export commonly used types at the crate root for convenience
pub use backend::{
    same_two_models, AllClose, ArtifactHandle, CompileConfig, Compiler, Exporter,
    OutputComparator, Runnable,
};
pub use command::{AccuracyMode, ReproCommand};
pub use error::{BackendError, GraphError};
pub use graph::{validate_name, Graph, Node, OpKind, Placeholder};
pub use interp::{EagerModule, Interpreter, Recording};
pub use reference::{ReferenceCompiler, ReferenceExporter};
pub use value::{CallArgs, DType, Device, Scalar, SymInt, Tensor, TensorMeta, Value, ACCELERATOR_PREFIXES};
pub use verdict::FailureVerdict;
