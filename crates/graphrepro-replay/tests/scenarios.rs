//! End-to-end replay scenarios: write a unit, read it back, replay it.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use graphrepro_core::{
    AccuracyMode, ArtifactHandle, BackendError, CompileConfig, Compiler, DType, Device, Exporter,
    FailureVerdict, Graph, OpKind, ReferenceCompiler, ReferenceExporter, ReproCommand, Runnable, SymInt,
    Tensor, Value,
};
use graphrepro_minimizer::MinimizerError;
use graphrepro_replay::{FailureOracle, ReplayDriver, ReplayOptions, ReplayOutcome, ReproError};
use graphrepro_report::{AssemblerConfig, ReproRequest, ReproScript, ReproScriptAssembler, CHECKPOINT_DIR};
use proptest::prelude::*;

type BackendResult<T> = std::result::Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingExporter {
    calls: Cell<usize>,
}

impl Exporter for CountingExporter {
    fn export(&self, graph: &Graph, args: &[Value]) -> BackendResult<Graph> {
        self.calls.set(self.calls.get() + 1);
        ReferenceExporter.export(graph, args)
    }
}

#[derive(Default)]
struct CountingCompiler {
    compiles: Cell<usize>,
    loads: Cell<usize>,
}

impl Compiler for CountingCompiler {
    fn name(&self) -> &str {
        "counting"
    }

    fn compile(&self, graph: &Graph, args: &[Value], config: &CompileConfig) -> BackendResult<ArtifactHandle> {
        self.compiles.set(self.compiles.get() + 1);
        ReferenceCompiler.compile(graph, args, config)
    }

    fn load(&self, artifact: &ArtifactHandle, device: &str) -> BackendResult<Box<dyn Runnable>> {
        self.loads.set(self.loads.get() + 1);
        ReferenceCompiler.load(artifact, device)
    }
}

struct Raising(String);

impl Runnable for Raising {
    fn run(&self, _args: &[Value]) -> BackendResult<Vec<Value>> {
        Err(BackendError::Runtime(self.0.clone()))
    }
}

/// Artifacts of graphs containing `trigger` raise `message` when run.
struct FaultyCompiler {
    trigger: OpKind,
    message: &'static str,
}

const POISONED: &str = "poisoned-artifact";

impl Compiler for FaultyCompiler {
    fn name(&self) -> &str {
        "faulty"
    }

    fn compile(&self, graph: &Graph, args: &[Value], config: &CompileConfig) -> BackendResult<ArtifactHandle> {
        if graph.nodes.iter().any(|n| n.op == self.trigger) {
            return Ok(ArtifactHandle::Path(PathBuf::from(POISONED)));
        }
        ReferenceCompiler.compile(graph, args, config)
    }

    fn load(&self, artifact: &ArtifactHandle, device: &str) -> BackendResult<Box<dyn Runnable>> {
        match artifact {
            ArtifactHandle::Path(path) if path == Path::new(POISONED) => Ok(Box::new(Raising(self.message.to_string()))),
            other => ReferenceCompiler.load(other, device),
        }
    }
}

struct OffByOne(Box<dyn Runnable>);

impl Runnable for OffByOne {
    fn run(&self, args: &[Value]) -> BackendResult<Vec<Value>> {
        self.0
            .run(args)?
            .into_iter()
            .map(|value| match value {
                Value::Tensor(t) => {
                    let shifted: Vec<f64> = t.to_f64_vec().into_iter().map(|v| v + 1.0).collect();
                    Tensor::from_values(t.shape().to_vec(), &shifted, t.dtype(), t.device())
                        .map(Value::from)
                        .map_err(|e| BackendError::Runtime(e.to_string()))
                }
                other => Ok(other),
            })
            .collect()
    }
}

/// Compiles fine but computes the wrong numbers.
struct MiscompilingCompiler;

impl Compiler for MiscompilingCompiler {
    fn name(&self) -> &str {
        "miscompiling_accuracy"
    }

    fn compile(&self, graph: &Graph, args: &[Value], config: &CompileConfig) -> BackendResult<ArtifactHandle> {
        ReferenceCompiler.compile(graph, args, config)
    }

    fn load(&self, artifact: &ArtifactHandle, device: &str) -> BackendResult<Box<dyn Runnable>> {
        Ok(Box::new(OffByOne(ReferenceCompiler.load(artifact, device)?)))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Two operations over a (4, 4) tensor and a symbolic size `s0 = 4`.
fn scenario_graph() -> (Graph, Vec<Value>) {
    let graph = Graph::new("scenario")
        .with_placeholder("x")
        .with_placeholder("s0")
        .with_node("scaled", OpKind::Mul, ["x", "s0"])
        .with_node("out", OpKind::Relu, ["scaled"])
        .with_output("out");
    let values: Vec<f64> = (0..16).map(|v| f64::from(v) * 0.25 - 2.0).collect();
    let args = vec![
        Tensor::from_values(vec![4, 4], &values, DType::F32, Device::Cpu)
            .unwrap()
            .into(),
        SymInt::new("s0", 4).into(),
    ];
    (graph, args)
}

/// x -> relu -> exp -> neg -> abs -> sum
fn pipeline_graph() -> (Graph, Vec<Value>) {
    let graph = Graph::new("pipeline")
        .with_placeholder("x")
        .with_node("r", OpKind::Relu, ["x"])
        .with_node("e", OpKind::Exp, ["r"])
        .with_node("n", OpKind::Neg, ["e"])
        .with_node("a", OpKind::Abs, ["n"])
        .with_node("s", OpKind::Sum, ["a"])
        .with_output("s");
    let x = Tensor::from_values(vec![3], &[0.5, -1.0, 2.0], DType::F32, Device::Cpu).unwrap();
    (graph, vec![x.into()])
}

fn write_unit(dir: &Path, graph: &Graph, args: &[Value], save_dir: Option<&Path>, command: ReproCommand) -> ReproScript {
    let request = ReproRequest::new(graph, args, "reference")
        .with_save_dir(save_dir)
        .with_command(command);
    let path = ReproScriptAssembler::with_config(AssemblerConfig::default().with_stable_output(true))
        .save_graph_repro(dir, &request)
        .unwrap();
    ReproScript::load(&path).unwrap()
}

fn get_args(script: &ReproScript, options: &ReplayOptions) -> (Graph, Vec<Value>) {
    let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
    match driver.replay(script, options, ReproCommand::GetArgs).unwrap() {
        ReplayOutcome::Args { graph, args } => (graph, args.to_vec()),
        other => panic!("expected arguments, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_tensor_and_symint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    let script = write_unit(&dir.path().join("unit"), &graph, &args, Some(dir.path()), ReproCommand::GetArgs);
    assert_eq!(script.entry.command, ReproCommand::GetArgs);

    let (_, decoded) = get_args(&script, &ReplayOptions::from_entry(&script.entry));
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].as_tensor().unwrap().shape(), &[4, 4]);
    assert_eq!(decoded[1].as_int(), Some(4));
    // data went through a storage file, so it is exact
    assert_eq!(decoded[0], args[0]);
}

#[test]
fn test_kernel_failure_matches_check_str() {
    let (graph, args) = scenario_graph();
    let compiler = FaultyCompiler {
        trigger: OpKind::Relu,
        message: "kernel launch failed",
    };
    let comparator = graphrepro_core::AllClose::default();
    let oracle = FailureOracle::new(&compiler, &comparator, "cpu");

    assert!(oracle.module_fails(&graph, &args, Some("kernel launch")));
    assert!(!oracle.module_fails(&graph, &args, Some("segfault")));
    assert_eq!(
        oracle.classify(&graph, &args),
        FailureVerdict::Crash("RuntimeError: kernel launch failed".to_string())
    );

    let clean = FailureOracle::new(&ReferenceCompiler, &comparator, "cpu");
    assert!(!clean.module_fails(&graph, &args, None));
}

#[test]
fn test_unsupported_device_fails_before_export() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    let script = write_unit(dir.path(), &graph, &args, None, ReproCommand::Run);

    let exporter = CountingExporter::default();
    let compiler = CountingCompiler::default();
    let driver = ReplayDriver::new(&exporter, &compiler);
    let options = ReplayOptions::new().with_device("tpu");

    for command in [ReproCommand::Run, ReproCommand::Minify, ReproCommand::MinifierQuery] {
        let err = driver.replay(&script, &options, command).unwrap_err();
        assert!(matches!(err, ReproError::UnsupportedDevice(ref d) if d == "tpu"), "{command}: {err}");
    }
    assert_eq!(exporter.calls.get(), 0);
    assert_eq!(compiler.compiles.get(), 0);
    assert_eq!(compiler.loads.get(), 0);

    driver.replay(&script, &ReplayOptions::new(), ReproCommand::Run).unwrap();
    assert_eq!(exporter.calls.get(), 1);
    assert_eq!(compiler.compiles.get(), 1);
}

#[test]
fn test_accuracy_mismatch_is_not_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    let script = write_unit(dir.path(), &graph, &args, Some(dir.path()), ReproCommand::Run);
    let driver = ReplayDriver::new(&ReferenceExporter, &MiscompilingCompiler);

    let accuracy = ReplayOptions::new().with_accuracy(AccuracyMode::Accuracy);
    let err = driver.replay(&script, &accuracy, ReproCommand::Run).unwrap_err();
    assert!(matches!(err, ReproError::AccuracyMismatch), "{err}");
    assert!(err.to_string().contains("Accuracy checking failed"));

    // crash mode does not look at the numbers
    let outcome = driver.replay(&script, &ReplayOptions::new(), ReproCommand::Run).unwrap();
    assert!(matches!(outcome, ReplayOutcome::Completed));
}

#[test]
fn test_minify_counts_only_raised_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let save_dir = dir.path().join("save");
    let script = write_unit(&dir.path().join("unit"), &graph, &args, Some(&save_dir), ReproCommand::Minify);
    let options = ReplayOptions::from_entry(&script.entry).with_accuracy(AccuracyMode::Accuracy);

    // wrong numbers alone do not make the minimizer's graph fail
    let driver = ReplayDriver::new(&ReferenceExporter, &MiscompilingCompiler);
    let err = driver.replay(&script, &options, ReproCommand::Minify).unwrap_err();
    assert!(matches!(err, ReproError::Minimizer(MinimizerError::NoFailure)), "{err}");

    let compiler = FaultyCompiler {
        trigger: OpKind::Neg,
        message: "kernel launch failed",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);
    let ReplayOutcome::Minified { result, .. } = driver.replay(&script, &options, ReproCommand::Minify).unwrap()
    else {
        panic!("expected a minified result");
    };
    assert_eq!(result.graph.nodes[0].op, OpKind::Neg);
}

#[test]
fn test_run_surfaces_compiled_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let script = write_unit(dir.path(), &graph, &args, None, ReproCommand::Run);
    let compiler = FaultyCompiler {
        trigger: OpKind::Neg,
        message: "illegal memory access",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);

    let err = driver.replay(&script, &ReplayOptions::new(), ReproCommand::Run).unwrap_err();
    assert!(matches!(err, ReproError::Backend(BackendError::Runtime(_))));
    assert_eq!(err.to_string(), "RuntimeError: illegal memory access");
}

#[test]
fn test_get_args_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    // no save directory: the large tensor is rebuilt from its recipe
    let script = write_unit(dir.path(), &graph, &args, None, ReproCommand::GetArgs);
    let options = ReplayOptions::new();

    let (graph_a, first) = get_args(&script, &options);
    let (graph_b, second) = get_args(&script, &options);
    assert_eq!(graph_a, graph_b);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        match (a, b) {
            (Value::Tensor(a), Value::Tensor(b)) => assert_eq!(a.meta(), b.meta()),
            (a, b) => assert_eq!(a, b),
        }
    }
    assert_eq!(first[0].as_tensor().unwrap().meta(), args[0].as_tensor().unwrap().meta());
}

#[test]
fn test_minifier_query_polarity() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let script = write_unit(dir.path(), &graph, &args, None, ReproCommand::MinifierQuery);
    let compiler = FaultyCompiler {
        trigger: OpKind::Neg,
        message: "kernel launch failed",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);

    let outcome = driver
        .replay(&script, &ReplayOptions::new(), ReproCommand::MinifierQuery)
        .unwrap();
    assert!(matches!(outcome, ReplayOutcome::Query { reproduced: true, .. }));
    assert_eq!(outcome.exit_code(), 0);

    let narrowed = ReplayOptions::new().with_check_str(Some("segfault".to_string()));
    let outcome = driver.replay(&script, &narrowed, ReproCommand::MinifierQuery).unwrap();
    assert!(matches!(outcome, ReplayOutcome::Query { reproduced: false, .. }));
    assert_eq!(outcome.exit_code(), 1);
}

#[test]
fn test_sanity_gate_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let save_dir = dir.path().join("save");
    let script = write_unit(&dir.path().join("unit"), &graph, &args, Some(&save_dir), ReproCommand::Minify);
    let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);

    let options = ReplayOptions::from_entry(&script.entry);
    let err = driver.replay(&script, &options, ReproCommand::Minify).unwrap_err();
    assert!(matches!(err, ReproError::Minimizer(MinimizerError::NoFailure)), "{err}");
    assert!(!save_dir.join(CHECKPOINT_DIR).exists());
}

#[test]
fn test_minify_shrinks_and_checkpoints_replay() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let save_dir = dir.path().join("save");
    let script = write_unit(&dir.path().join("unit"), &graph, &args, Some(&save_dir), ReproCommand::Minify);
    let compiler = FaultyCompiler {
        trigger: OpKind::Neg,
        message: "kernel launch failed",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);

    let options = ReplayOptions::from_entry(&script.entry)
        .with_check_str(Some("kernel launch".to_string()))
        .with_max_granularity(Some(4));
    let ReplayOutcome::Minified { result, checkpoints } =
        driver.replay(&script, &options, ReproCommand::Minify).unwrap()
    else {
        panic!("expected a minified result");
    };

    assert_eq!(result.graph.len(), 1);
    assert_eq!(result.graph.nodes[0].op, OpKind::Neg);
    assert!(!checkpoints.is_empty());
    assert!(checkpoints.iter().all(|p| p.starts_with(save_dir.join(CHECKPOINT_DIR))));

    // every checkpoint is a standalone unit that still fails
    for path in &checkpoints {
        let checkpoint = ReproScript::load(path).unwrap();
        assert_eq!(checkpoint.compiler.as_deref(), Some("faulty"));
        assert_eq!(checkpoint.entry.command, ReproCommand::Run);
        let replayed = ReplayOptions::from_entry(&checkpoint.entry);
        let err = driver.replay(&checkpoint, &replayed, checkpoint.entry.command).unwrap_err();
        assert!(err.to_string().contains("kernel launch"));
    }
}

#[test]
fn test_minify_with_offload() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let script = write_unit(dir.path(), &graph, &args, Some(dir.path()), ReproCommand::Minify);
    let compiler = FaultyCompiler {
        trigger: OpKind::Exp,
        message: "kernel launch failed",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);

    let options = ReplayOptions::from_entry(&script.entry)
        .with_offload_to_disk(true)
        .with_skip_saving_eager_intermediates(true);
    let ReplayOutcome::Minified { result, .. } = driver.replay(&script, &options, ReproCommand::Minify).unwrap()
    else {
        panic!("expected a minified result");
    };
    assert_eq!(result.graph.len(), 1);
    assert_eq!(result.graph.nodes[0].op, OpKind::Exp);
}

#[test]
fn test_newer_input_version_still_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    write_unit(dir.path(), &graph, &args, None, ReproCommand::GetArgs);
    let path = dir.path().join(graphrepro_report::SCRIPT_FILE);
    let text = fs::read_to_string(&path).unwrap().replace("inputs version 0", "inputs version 7");
    fs::write(&path, text).unwrap();

    let script = ReproScript::load(&path).unwrap();
    let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
    let prepared = driver.repro_common(&script, &ReplayOptions::new()).unwrap();
    assert!(matches!(
        prepared.version_skew,
        Some(graphrepro_codec::VersionSkew::Newer { found: 7, .. })
    ));
    assert_eq!(prepared.args.len(), 2);
}

#[test]
fn test_unknown_entry_arguments_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = scenario_graph();
    write_unit(dir.path(), &graph, &args, None, ReproCommand::Run);
    let path = dir.path().join(graphrepro_report::SCRIPT_FILE);
    let text = fs::read_to_string(&path)
        .unwrap()
        .replace("run_repro {", "run_repro {\"patch_level\":3,");
    fs::write(&path, text).unwrap();

    let script = ReproScript::load(&path).unwrap();
    assert_eq!(script.entry.command, ReproCommand::Run);
    let driver = ReplayDriver::new(&ReferenceExporter, &ReferenceCompiler);
    assert!(matches!(
        driver.replay(&script, &ReplayOptions::new(), ReproCommand::Run).unwrap(),
        ReplayOutcome::Completed
    ));
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Small,
    Large,
    Sym,
    Scalar,
    Null,
}

fn kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Small),
        Just(Kind::Large),
        Just(Kind::Sym),
        Just(Kind::Scalar),
        Just(Kind::Null),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_replayed_inputs_follow_placeholder_order(kinds in prop::collection::vec(kind(), 1..6)) {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = Graph::new("order");
        let mut args = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            let name = format!("p{i}");
            graph = graph.with_placeholder(name.clone());
            let value: Value = match kind {
                Kind::Small => Tensor::from_values(vec![2], &[i as f64, 1.0], DType::F64, Device::Cpu).unwrap().into(),
                Kind::Large => {
                    let data: Vec<f64> = (0..12).map(|v| f64::from(v) + i as f64).collect();
                    Tensor::from_values(vec![3, 4], &data, DType::F32, Device::Cpu).unwrap().into()
                }
                Kind::Sym => SymInt::new(name.clone(), i as i64).into(),
                Kind::Scalar => Value::Const(Some(graphrepro_core::Scalar::Int(i as i64))),
                Kind::Null => Value::Const(None),
            };
            args.push(value);
        }
        graph = graph.with_output("p0");

        let script = write_unit(dir.path(), &graph, &args, Some(dir.path()), ReproCommand::GetArgs);
        let counted = script.inputs.count().unwrap();
        let (_, decoded) = get_args(&script, &ReplayOptions::from_entry(&script.entry));

        prop_assert_eq!(counted.count, decoded.len());
        prop_assert_eq!(decoded, args);
    }
}

#[test]
fn test_checkpoint_options_carry_over() {
    let dir = tempfile::tempdir().unwrap();
    let (graph, args) = pipeline_graph();
    let save_dir = dir.path().join("save");
    let mut options = BTreeMap::new();
    options.insert("fuse".to_string(), serde_json::json!(false));
    let request = ReproRequest::new(&graph, &args, "reference")
        .with_save_dir(Some(&save_dir))
        .with_options(options);
    let path = ReproScriptAssembler::new()
        .save_graph_repro(&dir.path().join("unit"), &request)
        .unwrap();
    let script = ReproScript::load(&path).unwrap();

    let compiler = FaultyCompiler {
        trigger: OpKind::Abs,
        message: "bad cast",
    };
    let driver = ReplayDriver::new(&ReferenceExporter, &compiler);
    let ReplayOutcome::Minified { checkpoints, .. } = driver
        .replay(&script, &ReplayOptions::from_entry(&script.entry), ReproCommand::Minify)
        .unwrap()
    else {
        panic!("expected a minified result");
    };
    let last = ReproScript::load(checkpoints.last().unwrap()).unwrap();
    assert_eq!(last.options["fuse"], serde_json::json!(false));
}
