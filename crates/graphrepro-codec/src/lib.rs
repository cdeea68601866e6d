//! graphrepro Codec - Input serialization for repro scripts.
//!
//! Graph inputs are written as one statement line per placeholder, in
//! placeholder order, preceded by a format version line:
//!
//! - [`writer`]: `InputWriter` encodes tensors, symbolic ints and constants
//! - [`reader`]: `LoadArgs` and the two-pass `ArgSink` protocol
//! - [`statement`]: the statement grammar and fill modes
//! - [`storage`]: content-addressed side files for large tensors
//! - [`random`]: deterministic regeneration of unsaved tensor data

pub mod error;
pub mod random;
pub mod reader;
pub mod statement;
pub mod storage;
pub mod writer;

pub use error::{CodecError, Result};
pub use random::{Distribution, RandomRecipe};
pub use reader::{ArgSink, CountingSink, InputReader, LoadArgs, VersionSkew};
pub use statement::{ConstSpec, FillSpec, Statement, TensorSpec, FORMAT_VERSION, MAX_CONSTANT_NUMEL_INLINE};
pub use storage::{sha256_hex, StorageStore, STORAGE_DIR};
pub use writer::InputWriter;
