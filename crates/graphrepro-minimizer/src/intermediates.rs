//! Eager values of every node in the original graph.
//!
//! When a shrink removes a node whose result is still used, the removed
//! node's eager value becomes a new graph input. These values are kept in
//! memory or, with disk offload, written through the codec's storage files
//! and read back one at a time on demand.

use std::collections::HashMap;
use std::path::Path;

use graphrepro_codec::{InputReader, InputWriter, LoadArgs, Statement, StorageStore};
use graphrepro_core::{Recording, Value};
use tracing::{debug, info};

use crate::error::{MinimizerError, Result};

enum Inner {
    Memory(HashMap<String, Value>),
    Disk {
        store: StorageStore,
        statements: HashMap<String, Statement>,
    },
}

/// Lookup of eager node values by name.
pub struct IntermediateStore {
    inner: Inner,
}

impl IntermediateStore {
    pub fn in_memory(recording: Recording) -> Self {
        Self {
            inner: Inner::Memory(recording.values),
        }
    }

    /// Writes every value under `dir` and keeps only the statements.
    ///
    /// With `skip_data`, tensors are recorded as metadata plus a random
    /// recipe and no data is written.
    pub fn offload(recording: Recording, dir: &Path, skip_data: bool) -> Result<Self> {
        let store = StorageStore::at(dir.to_path_buf());
        let mut writer = InputWriter::with_store(Some(store.clone()));
        let mut names: Vec<&String> = recording.values.keys().collect();
        names.sort();

        for name in names {
            match &recording.values[name] {
                Value::Tensor(t) if skip_data => writer.tensor_metadata_only(name, t),
                value => writer.value(name, value)?,
            }
        }

        let statements: HashMap<String, Statement> = writer
            .statements()
            .iter()
            .filter_map(|s| s.name().map(|n| (n.to_string(), s.clone())))
            .collect();
        info!(
            dir = %dir.display(),
            values = statements.len(),
            skip_data,
            "offloaded eager intermediates"
        );

        Ok(Self {
            inner: Inner::Disk { store, statements },
        })
    }

    pub fn is_offloaded(&self) -> bool {
        matches!(self.inner, Inner::Disk { .. })
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        match &self.inner {
            Inner::Memory(values) => values
                .get(name)
                .cloned()
                .ok_or_else(|| MinimizerError::Eager(format!("no eager value recorded for '{name}'"))),
            Inner::Disk { store, statements } => {
                let statement = statements
                    .get(name)
                    .ok_or_else(|| MinimizerError::Eager(format!("no eager value recorded for '{name}'")))?;
                let mut args = LoadArgs::new();
                args.push(statement.clone());
                let mut reader = InputReader::with_store(Some(store.clone()));
                args.replay(&mut reader)?;
                debug!(name, "reloaded offloaded intermediate");
                reader
                    .into_args()
                    .pop()
                    .ok_or_else(|| MinimizerError::Eager(format!("offloaded value '{name}' is empty")))
            }
        }
    }
}
