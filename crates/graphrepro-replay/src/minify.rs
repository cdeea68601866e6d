//! Minification of a replayed failure.
//!
//! The minimizer gets the failure oracle bound to the configured check
//! string and a checkpoint callback that persists every state it reports as
//! a fresh repro unit under `<save_dir>/checkpoints`. Without a save
//! directory, `minifier/` next to the replayed script takes its place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use graphrepro_core::{AccuracyMode, Graph, ReproCommand, Value};
use graphrepro_minimizer::{DumpState, MinifiedGraph, MinimizerError};
use graphrepro_report::{checkpoint_dir, ReproRequest, ReproScriptAssembler};
use serde_json::Value as Json;
use tracing::info;

use crate::driver::{PreparedRepro, ReplayDriver};
use crate::error::Result;
use crate::options::ReplayOptions;

/// Directory next to the script used when no save directory is configured.
pub const MINIFIER_DIR: &str = "minifier";

/// Writes each minimizer state as a `run` unit tagged with the compiler name.
pub struct CheckpointDumper<'a> {
    assembler: ReproScriptAssembler,
    compiler_name: &'a str,
    save_dir: &'a Path,
    options: BTreeMap<String, Json>,
    accuracy: AccuracyMode,
    check_str: Option<&'a str>,
    written: Vec<PathBuf>,
}

impl<'a> CheckpointDumper<'a> {
    pub fn new(assembler: ReproScriptAssembler, compiler_name: &'a str, save_dir: &'a Path) -> Self {
        Self {
            assembler,
            compiler_name,
            save_dir,
            options: BTreeMap::new(),
            accuracy: AccuracyMode::Off,
            check_str: None,
            written: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: BTreeMap<String, Json>) -> Self {
        self.options = options;
        self
    }

    pub fn with_accuracy(mut self, accuracy: AccuracyMode) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_check_str(mut self, check_str: Option<&'a str>) -> Self {
        self.check_str = check_str;
        self
    }

    /// Script paths written so far, oldest first.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn into_written(self) -> Vec<PathBuf> {
        self.written
    }
}

impl DumpState for CheckpointDumper<'_> {
    fn dump_state(&mut self, graph: &Graph, args: &[Value]) -> graphrepro_minimizer::Result<()> {
        let save_dir = self.save_dir;
        let label = format!("{:04}", self.written.len());
        let request = ReproRequest::new(graph, args, self.compiler_name)
            .with_options(self.options.clone())
            .with_save_dir(Some(save_dir))
            .with_command(ReproCommand::Run)
            .with_accuracy(Some(self.accuracy))
            .with_check_str(self.check_str);
        let path = self
            .assembler
            .save_graph_repro(&checkpoint_dir(save_dir, &label), &request)
            .map_err(|e| MinimizerError::Dump(e.to_string()))?;

        info!(path = %path.display(), nodes = graph.len(), "wrote minifier checkpoint");
        self.written.push(path);
        Ok(())
    }
}

impl ReplayDriver<'_> {
    /// Shrinks the prepared graph while it keeps failing.
    ///
    /// Returns the minimized graph and the checkpoint scripts written.
    /// Checkpoints and offloaded intermediates go to the save directory, or
    /// to [`PreparedRepro::minifier_dir`] when there is none.
    ///
    /// # Errors
    ///
    /// * `ReproError::Minimizer` - The sanity check found no failure, the
    ///   knobs are invalid or a checkpoint could not be written.
    pub fn repro_minify(
        &self,
        prepared: &PreparedRepro,
        options: &ReplayOptions,
    ) -> Result<(MinifiedGraph, Vec<PathBuf>)> {
        let oracle = self.oracle(prepared, options);
        let check_str = options.check_str();
        let module_fails = |graph: &Graph, args: &[Value]| oracle.module_fails(graph, args, check_str);

        let assembler = ReproScriptAssembler::with_config(
            self.assembler_config.clone().with_config(prepared.config.clone()),
        );
        let save_dir = options.save_dir().unwrap_or(prepared.minifier_dir.as_path());
        let config = options.minifier_config().with_save_dir(Some(save_dir.to_path_buf()));
        let mut dumper = CheckpointDumper::new(assembler, self.compiler.name(), save_dir)
            .with_options(prepared.options.clone())
            .with_accuracy(options.accuracy)
            .with_check_str(check_str);

        info!(
            minifier = self.minifier.name(),
            nodes = prepared.graph.len(),
            check_str,
            save_dir = %save_dir.display(),
            "minifying repro"
        );
        let result = self.minifier.minify(
            &prepared.graph,
            &prepared.args,
            &config,
            &module_fails,
            &mut dumper,
        )?;
        info!(%result, checkpoints = dumper.written().len(), "minification finished");

        Ok((result, dumper.into_written()))
    }
}
