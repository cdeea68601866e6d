//! Replaying a repro unit.
//!
//! Every command shares [`ReplayDriver::repro_common`]: check the input
//! format version, decode the inputs in two passes, build the call tuple and
//! re-export the module. The command then decides what happens with the
//! exported graph. Compiling commands validate the device first, before any
//! decoding or export work.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use graphrepro_codec::{InputReader, LoadArgs, VersionSkew};
use graphrepro_core::{
    AllClose, CallArgs, CompileConfig, Compiler, Exporter, FailureVerdict, Graph, OutputComparator,
    ReproCommand,
};
use graphrepro_minimizer::{GranularityMinifier, MinifiedGraph, Minifier};
use graphrepro_report::{AssemblerConfig, ReproScript};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value as Json;
use tracing::{debug, info, instrument, warn};

use crate::error::{ReproError, Result};
use crate::minify::MINIFIER_DIR;
use crate::oracle::FailureOracle;
use crate::options::ReplayOptions;

static DEFAULT_COMPARATOR: AllClose = AllClose {
    rtol: 1e-4,
    atol: 1e-5,
    ignore_non_fp: false,
};

static DEFAULT_MINIFIER: GranularityMinifier = GranularityMinifier;

/// State shared by every command once the unit is decoded and exported.
#[derive(Debug, Clone)]
pub struct PreparedRepro {
    /// The exported graph.
    pub graph: Graph,
    /// Inputs in placeholder order.
    pub args: CallArgs,
    pub compile_config: CompileConfig,
    /// Configuration snapshot carried by the script.
    pub config: BTreeMap<String, Json>,
    /// Compile options carried by the script.
    pub options: BTreeMap<String, Json>,
    pub version_skew: Option<VersionSkew>,
    /// Where minification writes when no save directory is configured.
    pub minifier_dir: PathBuf,
}

/// Result of one replay.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    /// `run` finished without the failure.
    Completed,
    /// `get_args` reconstructed the inputs.
    Args { graph: Graph, args: CallArgs },
    Minified {
        result: MinifiedGraph,
        /// Script paths of every checkpoint written during the search.
        checkpoints: Vec<PathBuf>,
    },
    /// `minifier-query`: whether the failure reproduced.
    Query { reproduced: bool, verdict: FailureVerdict },
}

impl ReplayOutcome {
    /// Process exit code for this outcome.
    ///
    /// A query exits non-zero when the repro ran cleanly.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Query { reproduced: false, .. } => 1,
            _ => 0,
        }
    }
}

/// Drives a parsed repro script through one command.
pub struct ReplayDriver<'a> {
    pub(crate) exporter: &'a dyn Exporter,
    pub(crate) compiler: &'a dyn Compiler,
    pub(crate) comparator: &'a dyn OutputComparator,
    pub(crate) minifier: &'a dyn Minifier,
    pub(crate) assembler_config: AssemblerConfig,
}

impl<'a> ReplayDriver<'a> {
    pub fn new(exporter: &'a dyn Exporter, compiler: &'a dyn Compiler) -> Self {
        Self {
            exporter,
            compiler,
            comparator: &DEFAULT_COMPARATOR,
            minifier: &DEFAULT_MINIFIER,
            assembler_config: AssemblerConfig::default(),
        }
    }

    pub fn with_comparator(mut self, comparator: &'a dyn OutputComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_minifier(mut self, minifier: &'a dyn Minifier) -> Self {
        self.minifier = minifier;
        self
    }

    /// Configuration for checkpoint scripts written while minifying.
    pub fn with_assembler_config(mut self, config: AssemblerConfig) -> Self {
        self.assembler_config = config;
        self
    }

    pub fn compiler(&self) -> &dyn Compiler {
        self.compiler
    }

    /// Runs `command` against `script`.
    #[instrument(skip_all, fields(command = %command, device = %options.device))]
    pub fn replay(
        &self,
        script: &ReproScript,
        options: &ReplayOptions,
        command: ReproCommand,
    ) -> Result<ReplayOutcome> {
        if command.compiles() {
            options.validate_device()?;
        }
        let prepared = self.repro_common(script, options)?;

        match command {
            ReproCommand::GetArgs => Ok(ReplayOutcome::Args {
                graph: prepared.graph,
                args: prepared.args,
            }),
            ReproCommand::Run => {
                self.oracle(&prepared, options).check(&prepared.graph, &prepared.args)?;
                info!("repro ran without failing");
                Ok(ReplayOutcome::Completed)
            }
            ReproCommand::Minify => {
                let (result, checkpoints) = self.repro_minify(&prepared, options)?;
                Ok(ReplayOutcome::Minified { result, checkpoints })
            }
            ReproCommand::MinifierQuery => {
                let verdict = self.oracle(&prepared, options).classify(&prepared.graph, &prepared.args);
                let reproduced = verdict.matches(options.check_str());
                info!(%verdict, reproduced, "minifier query finished");
                Ok(ReplayOutcome::Query { reproduced, verdict })
            }
        }
    }

    /// Decodes the inputs and re-exports the module.
    ///
    /// Version skew is logged and reported in the result but never fatal.
    /// Decoding runs a counting pass first so progress can be shown while
    /// tensors are materialized.
    ///
    /// # Errors
    ///
    /// * `ReproError::Codec` - A statement or storage file is malformed.
    /// * `ReproError::Script` - The graph artifact cannot be read.
    /// * `ReproError::Export` - The exporter rejected the module.
    pub fn repro_common(&self, script: &ReproScript, options: &ReplayOptions) -> Result<PreparedRepro> {
        let mut version_skew = None;
        script.inputs.check_version(&mut |skew: &VersionSkew| version_skew = Some(*skew));

        let counted = script.inputs.count()?;
        debug!(values = counted.count, bytes = counted.total_bytes, "counted inputs");

        let bar = loading_bar(counted.total_bytes);
        let mut reader = InputReader::new(options.save_dir()).with_progress(|n| bar.inc(n));
        script.inputs.replay(&mut reader)?;
        let args = CallArgs::new(reader.into_args());
        bar.finish_and_clear();

        let module = script.load_module()?;
        for (index, statement, placeholder) in misbound_inputs(&script.inputs, &module) {
            warn!(
                index,
                statement,
                placeholder,
                "input statement name differs from the placeholder it binds to"
            );
        }
        let graph = self.exporter.export(&module, &args).map_err(ReproError::Export)?;

        let mut patches = script.config.clone();
        patches.extend(script.options.clone());
        let compile_config = CompileConfig::new()
            .with_patches(patches)
            .with_intermediate_hooks(true);

        info!(
            graph = %graph.name,
            nodes = graph.len(),
            inputs = args.len(),
            "prepared repro"
        );

        Ok(PreparedRepro {
            graph,
            args,
            compile_config,
            config: script.config.clone(),
            options: script.options.clone(),
            version_skew,
            minifier_dir: script
                .module
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(MINIFIER_DIR),
        })
    }

    pub(crate) fn oracle(&self, prepared: &PreparedRepro, options: &ReplayOptions) -> FailureOracle<'a> {
        FailureOracle::new(self.compiler, self.comparator, options.device.clone())
            .with_config(prepared.compile_config.clone())
            .with_accuracy(options.accuracy)
    }
}

/// Positions where the statement name is not the graph's placeholder name.
///
/// Inputs bind by position, so these are bound to a differently named
/// placeholder.
fn misbound_inputs<'s>(inputs: &'s LoadArgs, module: &'s Graph) -> Vec<(usize, &'s str, &'s str)> {
    inputs
        .names()
        .zip(module.placeholders.iter())
        .enumerate()
        .filter(|(_, (statement, placeholder))| *statement != placeholder.name)
        .map(|(index, (statement, placeholder))| (index, statement, placeholder.name.as_str()))
        .collect()
}

fn loading_bar(total_bytes: u64) -> ProgressBar {
    if total_bytes == 0 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total_bytes);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message("Loading inputs");
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrepro_core::{
        AccuracyMode, DType, Device, OpKind, ReferenceCompiler, ReferenceExporter, SymInt, Tensor, Value,
    };
    use graphrepro_report::{ReproRequest, ReproScriptAssembler};
    use std::path::Path;

    fn unit(dir: &Path, save_dir: Option<&Path>) -> ReproScript {
        let graph = Graph::new("g")
            .with_placeholder("x")
            .with_placeholder("s0")
            .with_node("y", OpKind::Mul, ["x", "s0"])
            .with_node("z", OpKind::Relu, ["y"])
            .with_output("z");
        let values: Vec<f64> = (0..16).map(|v| f64::from(v) - 8.0).collect();
        let args: Vec<Value> = vec![
            Tensor::from_values(vec![4, 4], &values, DType::F32, Device::Cpu)
                .unwrap()
                .into(),
            SymInt::new("s0", 4).into(),
        ];
        let mut options = BTreeMap::new();
        options.insert("unroll".to_string(), serde_json::json!(2));
        let request = ReproRequest::new(&graph, &args, "reference")
            .with_save_dir(save_dir)
            .with_options(options);
        let path = ReproScriptAssembler::new().save_graph_repro(dir, &request).unwrap();
        ReproScript::load(&path).unwrap()
    }

    #[test]
    fn test_get_args_reconstructs_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let script = unit(&dir.path().join("unit"), Some(dir.path()));
        let options = ReplayOptions::from_entry(&script.entry);
        let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);

        let ReplayOutcome::Args { graph, args } = driver.replay(&script, &options, ReproCommand::GetArgs).unwrap()
        else {
            panic!("expected arguments");
        };
        assert_eq!(graph.len(), 2);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].as_tensor().unwrap().shape(), &[4, 4]);
        assert_eq!(args[1].as_int(), Some(4));
    }

    #[test]
    fn test_common_enables_hooks_and_patches() {
        let dir = tempfile::tempdir().unwrap();
        let script = unit(dir.path(), None);
        let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
        let prepared = driver.repro_common(&script, &ReplayOptions::new()).unwrap();
        assert!(prepared.compile_config.generate_intermediate_hooks);
        assert_eq!(prepared.compile_config.patches["unroll"], serde_json::json!(2));
        assert!(prepared.version_skew.is_none());
    }

    #[test]
    fn test_run_and_query_on_clean_repro() {
        let dir = tempfile::tempdir().unwrap();
        let script = unit(dir.path(), None);
        let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
        let options = ReplayOptions::new();

        let outcome = driver.replay(&script, &options, ReproCommand::Run).unwrap();
        assert!(matches!(outcome, ReplayOutcome::Completed));
        assert_eq!(outcome.exit_code(), 0);

        let accuracy = options.clone().with_accuracy(AccuracyMode::Accuracy);
        assert!(matches!(
            driver.replay(&script, &accuracy, ReproCommand::Run).unwrap(),
            ReplayOutcome::Completed
        ));

        let query = driver.replay(&script, &options, ReproCommand::MinifierQuery).unwrap();
        assert!(matches!(query, ReplayOutcome::Query { reproduced: false, .. }));
        assert_eq!(query.exit_code(), 1);
    }

    #[test]
    fn test_get_args_ignores_device() {
        let dir = tempfile::tempdir().unwrap();
        let script = unit(dir.path(), None);
        let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
        let options = ReplayOptions::new().with_device("tpu");
        assert!(driver.replay(&script, &options, ReproCommand::GetArgs).is_ok());
        assert!(matches!(
            driver.replay(&script, &options, ReproCommand::Run),
            Err(ReproError::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_misbound_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let script = unit(dir.path(), None);
        let module = script.load_module().unwrap();
        assert!(misbound_inputs(&script.inputs, &module).is_empty());

        let swapped = LoadArgs::parse("inputs version 0\nsymint s0 {\"symbol\":\"s0\",\"value\":4}\nconst x {}").unwrap();
        assert_eq!(
            misbound_inputs(&swapped, &module),
            vec![(0, "s0", "x"), (1, "x", "s0")]
        );
    }

    #[test]
    fn test_loading_bar_hidden_for_empty_input() {
        assert!(loading_bar(0).is_hidden());
        assert_eq!(loading_bar(128).length(), Some(128));
    }
}
