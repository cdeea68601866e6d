//! Encoding graph inputs into statements.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use graphrepro_core::{Scalar, SymInt, Tensor, Value};
use tracing::trace;

use crate::error::Result;
use crate::random::RandomRecipe;
use crate::reader::LoadArgs;
use crate::statement::{ConstSpec, FillSpec, Statement, TensorSpec, FORMAT_VERSION, MAX_CONSTANT_NUMEL_INLINE};
use crate::storage::StorageStore;

/// Accumulates input statements in placeholder order.
///
/// Small tensors are stored inline. Larger tensors go to content-addressed
/// side files when a save directory is available and are reduced to a
/// random recipe otherwise.
#[derive(Debug)]
pub struct InputWriter {
    store: Option<StorageStore>,
    statements: Vec<Statement>,
}

impl InputWriter {
    pub fn new(save_dir: Option<&Path>) -> Self {
        Self::with_store(save_dir.map(StorageStore::new))
    }

    /// Writer using an explicit storage location.
    pub fn with_store(store: Option<StorageStore>) -> Self {
        Self {
            store,
            statements: vec![Statement::Version(FORMAT_VERSION)],
        }
    }

    pub fn tensor(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let meta = tensor.meta();
        let fill = if meta.storage_numel() <= MAX_CONSTANT_NUMEL_INLINE {
            FillSpec::Inline {
                data: STANDARD.encode(tensor.storage_bytes()),
            }
        } else if let Some(store) = &self.store {
            let bytes = tensor.storage_bytes();
            FillSpec::Storage {
                hash: store.write(bytes)?,
                nbytes: bytes.len(),
                recipe: RandomRecipe::summarize(tensor),
            }
        } else {
            FillSpec::Random {
                recipe: RandomRecipe::summarize(tensor),
            }
        };
        trace!(name, numel = meta.numel(), "encoded tensor");
        self.push_tensor(name, tensor, fill);
        Ok(())
    }

    /// Encodes only the metadata and a recipe, never the data.
    pub fn tensor_metadata_only(&mut self, name: &str, tensor: &Tensor) {
        let fill = FillSpec::Random {
            recipe: RandomRecipe::summarize(tensor),
        };
        self.push_tensor(name, tensor, fill);
    }

    fn push_tensor(&mut self, name: &str, tensor: &Tensor, fill: FillSpec) {
        let meta = tensor.meta();
        self.statements.push(Statement::Tensor {
            name: name.to_string(),
            spec: TensorSpec {
                shape: meta.shape().to_vec(),
                stride: meta.stride().to_vec(),
                storage_offset: meta.storage_offset(),
                dtype: meta.dtype(),
                device: meta.device(),
                requires_grad: tensor.requires_grad(),
                fill,
            },
        });
    }

    pub fn symint(&mut self, name: &str, symint: &SymInt) {
        self.statements.push(Statement::SymInt {
            name: name.to_string(),
            spec: symint.clone(),
        });
    }

    pub fn constant(&mut self, name: &str, value: Option<Scalar>) {
        self.statements.push(Statement::Const {
            name: name.to_string(),
            spec: ConstSpec { value },
        });
    }

    /// Encodes any value.
    pub fn value(&mut self, name: &str, value: &Value) -> Result<()> {
        match value {
            Value::Tensor(t) => self.tensor(name, t)?,
            Value::SymInt(s) => self.symint(name, s),
            Value::Const(c) => self.constant(name, *c),
        }
        Ok(())
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Rendered statement lines, version line first.
    pub fn lines(&self) -> Result<Vec<String>> {
        self.statements.iter().map(Statement::render).collect()
    }

    /// Hands the statements to a reader without going through text.
    pub fn into_load_args(self) -> LoadArgs {
        let mut args = LoadArgs::new();
        for statement in self.statements {
            args.push(statement);
        }
        args
    }
}
