//! Decoding input statements.
//!
//! Decoding is two-pass. [`LoadArgs`] holds the parsed statements and
//! replays them into an [`ArgSink`]: first a [`CountingSink`] that sizes
//! the work without touching tensor data, then an [`InputReader`] that
//! materializes the values.

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use graphrepro_core::{SymInt, Tensor, Value};
use tracing::warn;

use crate::error::Result;
use crate::statement::{ConstSpec, FillSpec, Statement, TensorSpec, FORMAT_VERSION};
use crate::storage::StorageStore;

/// Receives decoded statements in order.
pub trait ArgSink {
    fn tensor(&mut self, name: &str, spec: &TensorSpec) -> Result<()>;
    fn symint(&mut self, name: &str, spec: &SymInt) -> Result<()>;
    fn constant(&mut self, name: &str, spec: &ConstSpec) -> Result<()>;
}

/// A stream whose version differs from what this decoder writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSkew {
    /// No `inputs version` statement; written before versioning existed.
    Unversioned,
    /// Written by a newer encoder.
    Newer { found: u32, supported: u32 },
}

impl fmt::Display for VersionSkew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unversioned => f.write_str("input stream has no version; decoding as a legacy stream"),
            Self::Newer { found, supported } => write!(
                f,
                "input stream version {found} is newer than supported version {supported}; decoding best-effort"
            ),
        }
    }
}

/// Parsed input statements, in placeholder order.
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    version: Option<u32>,
    statements: Vec<Statement>,
}

impl LoadArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a block of statement lines. Unknown keywords are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut args = Self::new();
        for (index, line) in text.lines().enumerate() {
            args.push_line(index + 1, line)?;
        }
        Ok(args)
    }

    /// Parses and appends one line.
    pub fn push_line(&mut self, line: usize, text: &str) -> Result<()> {
        match Statement::parse(line, text)? {
            Some(statement) => self.push(statement),
            None => {
                let keyword = text.split_whitespace().next().unwrap_or_default();
                if !keyword.is_empty() && !keyword.starts_with('#') {
                    warn!(line, keyword, "skipping unknown input statement");
                }
            }
        }
        Ok(())
    }

    pub fn push(&mut self, statement: Statement) {
        match statement {
            Statement::Version(v) => self.version = Some(v),
            other => self.statements.push(other),
        }
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Placeholder names in statement order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().filter_map(Statement::name)
    }

    /// Returns the version skew, if any.
    pub fn version_skew(&self) -> Option<VersionSkew> {
        match self.version {
            None => Some(VersionSkew::Unversioned),
            Some(found) if found > FORMAT_VERSION => Some(VersionSkew::Newer {
                found,
                supported: FORMAT_VERSION,
            }),
            Some(_) => None,
        }
    }

    /// Logs a warning on version skew and hands it to `on_skew`.
    pub fn check_version(&self, on_skew: &mut dyn FnMut(&VersionSkew)) {
        if let Some(skew) = self.version_skew() {
            warn!(version = ?self.version, supported = FORMAT_VERSION, "{skew}");
            on_skew(&skew);
        }
    }

    /// Number of values the stream produces.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Feeds every statement to `sink` in order.
    pub fn replay(&self, sink: &mut dyn ArgSink) -> Result<()> {
        for statement in &self.statements {
            match statement {
                Statement::Tensor { name, spec } => sink.tensor(name, spec)?,
                Statement::SymInt { name, spec } => sink.symint(name, spec)?,
                Statement::Const { name, spec } => sink.constant(name, spec)?,
                Statement::Version(_) => {}
            }
        }
        Ok(())
    }

    /// Runs the counting pass.
    pub fn count(&self) -> Result<CountingSink> {
        let mut sink = CountingSink::default();
        self.replay(&mut sink)?;
        Ok(sink)
    }
}

/// First pass: counts values and tensor bytes without materializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountingSink {
    pub count: usize,
    pub total_bytes: u64,
}

impl ArgSink for CountingSink {
    fn tensor(&mut self, _name: &str, spec: &TensorSpec) -> Result<()> {
        self.count += 1;
        self.total_bytes += spec.meta()?.storage_nbytes() as u64;
        Ok(())
    }

    fn symint(&mut self, _name: &str, _spec: &SymInt) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn constant(&mut self, _name: &str, _spec: &ConstSpec) -> Result<()> {
        self.count += 1;
        Ok(())
    }
}

/// Second pass: materializes values, reporting tensor bytes as they load.
pub struct InputReader<'a> {
    store: Option<StorageStore>,
    args: Vec<Value>,
    progress: Option<Box<dyn FnMut(u64) + 'a>>,
}

impl<'a> InputReader<'a> {
    pub fn new(save_dir: Option<&Path>) -> Self {
        Self::with_store(save_dir.map(StorageStore::new))
    }

    pub fn with_store(store: Option<StorageStore>) -> Self {
        Self {
            store,
            args: Vec::new(),
            progress: None,
        }
    }

    /// Called with the byte size of each tensor after it is materialized.
    pub fn with_progress(mut self, progress: impl FnMut(u64) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    fn storage(&self, name: &str, spec: &TensorSpec, nbytes: usize) -> Result<Vec<u8>> {
        let meta = spec.meta()?;
        match &spec.fill {
            FillSpec::Inline { data } => Ok(STANDARD.decode(data)?),
            FillSpec::Random { recipe } => Ok(recipe.materialize(&meta)),
            FillSpec::Storage { hash, recipe, .. } => {
                let stored = match &self.store {
                    Some(store) => store.read(hash, nbytes)?,
                    None => None,
                };
                Ok(stored.unwrap_or_else(|| {
                    warn!(name, hash = %hash, "storage file unavailable, regenerating from recipe");
                    recipe.materialize(&meta)
                }))
            }
        }
    }
}

impl ArgSink for InputReader<'_> {
    fn tensor(&mut self, name: &str, spec: &TensorSpec) -> Result<()> {
        let meta = spec.meta()?;
        let nbytes = match &spec.fill {
            FillSpec::Storage { nbytes, .. } => *nbytes,
            _ => meta.storage_nbytes(),
        };
        let bytes = self.storage(name, spec, nbytes)?;
        let tensor = Tensor::from_storage(meta, bytes)?.with_requires_grad(spec.requires_grad);
        let size = tensor.storage_bytes().len() as u64;
        self.args.push(Value::Tensor(tensor));
        if let Some(progress) = self.progress.as_mut() {
            progress(size);
        }
        Ok(())
    }

    fn symint(&mut self, _name: &str, spec: &SymInt) -> Result<()> {
        self.args.push(Value::SymInt(spec.clone()));
        Ok(())
    }

    fn constant(&mut self, _name: &str, spec: &ConstSpec) -> Result<()> {
        self.args.push(Value::Const(spec.value));
        Ok(())
    }
}
