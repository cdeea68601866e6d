//! Repro script generation.
//!
//! A repro unit is a directory holding the exported graph artifact and a
//! script that reconstructs the inputs and invokes `run_repro` with the
//! command, accuracy mode and check string the failure was captured with.
//! Large tensor data lives in `<save_dir>/storages` next to it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use graphrepro_codec::{InputWriter, FORMAT_VERSION};
use graphrepro_core::{validate_name, AccuracyMode, Graph, ReproCommand, Value};
use serde_json::Value as Json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::environment::DeviceInfo;
use crate::error::{Result, ScriptError};
use crate::script::{EntryPoint, GRAPH_FILE, SCRIPT_FILE, SHEBANG};

/// Directory under a save directory that holds checkpoint units.
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Configuration for script generation.
#[derive(Debug, Clone, Default)]
pub struct AssemblerConfig {
    /// Omit every header field that varies between environments or runs.
    pub stable_output: bool,
    /// Configuration snapshot written as `config` lines.
    pub config: BTreeMap<String, Json>,
}

impl AssemblerConfig {
    pub fn with_stable_output(mut self, stable: bool) -> Self {
        self.stable_output = stable;
        self
    }

    pub fn with_config(mut self, config: BTreeMap<String, Json>) -> Self {
        self.config = config;
        self
    }
}

/// One failure to persist.
#[derive(Debug, Clone)]
pub struct ReproRequest<'a> {
    pub graph: &'a Graph,
    pub args: &'a [Value],
    pub compiler_name: &'a str,
    pub options: BTreeMap<String, Json>,
    pub save_dir: Option<&'a Path>,
    pub command: ReproCommand,
    /// `None` enables accuracy iff the compiler name contains `_accuracy`.
    pub accuracy: Option<AccuracyMode>,
    pub check_str: Option<&'a str>,
}

impl<'a> ReproRequest<'a> {
    pub fn new(graph: &'a Graph, args: &'a [Value], compiler_name: &'a str) -> Self {
        Self {
            graph,
            args,
            compiler_name,
            options: BTreeMap::new(),
            save_dir: None,
            command: ReproCommand::Run,
            accuracy: None,
            check_str: None,
        }
    }

    pub fn with_options(mut self, options: BTreeMap<String, Json>) -> Self {
        self.options = options;
        self
    }

    pub fn with_save_dir(mut self, save_dir: Option<&'a Path>) -> Self {
        self.save_dir = save_dir;
        self
    }

    pub fn with_command(mut self, command: ReproCommand) -> Self {
        self.command = command;
        self
    }

    pub fn with_accuracy(mut self, accuracy: Option<AccuracyMode>) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_check_str(mut self, check_str: Option<&'a str>) -> Self {
        self.check_str = check_str;
        self
    }

    fn resolved_accuracy(&self) -> AccuracyMode {
        self.accuracy
            .unwrap_or_else(|| AccuracyMode::from_flag(self.compiler_name.contains("_accuracy")))
    }
}

/// An assembled unit, not yet written to disk.
#[derive(Debug, Clone)]
pub struct ReproUnit {
    script: String,
    graph: Graph,
}

impl ReproUnit {
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Writes the graph artifact and the script, returning the script path.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn write_to_directory(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(path)?;
        self.graph.save(&path.join(GRAPH_FILE))?;

        let script_path = path.join(SCRIPT_FILE);
        fs::write(&script_path, &self.script)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }

        Ok(script_path)
    }
}

/// Fresh, uniquely named checkpoint directory under `save_dir`.
pub fn checkpoint_dir(save_dir: &Path, label: &str) -> PathBuf {
    let id = Uuid::new_v4().simple().to_string();
    save_dir
        .join(CHECKPOINT_DIR)
        .join(format!("{label}-{}", &id[..8]))
}

/// Repro script generator.
#[derive(Debug, Clone, Default)]
pub struct ReproScriptAssembler {
    config: AssemblerConfig,
}

impl ReproScriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Builds the script text for `request`.
    ///
    /// Tensor data above the inline threshold is written to the save
    /// directory's storage area as a side effect.
    #[instrument(skip_all, fields(graph = %request.graph.name, compiler = request.compiler_name, command = %request.command))]
    pub fn assemble(&self, request: &ReproRequest<'_>) -> Result<ReproUnit> {
        let placeholders = &request.graph.placeholders;
        if placeholders.len() != request.args.len() {
            return Err(ScriptError::Arity {
                expected: placeholders.len(),
                found: request.args.len(),
            });
        }

        for placeholder in placeholders {
            validate_name(&placeholder.name)?;
        }

        let mut writer = InputWriter::new(request.save_dir);
        for (placeholder, value) in placeholders.iter().zip(request.args) {
            writer.value(&placeholder.name, value)?;
        }

        let mut script = String::new();
        self.write_header(&mut script, request.compiler_name);

        if !self.config.config.is_empty() {
            for (key, value) in &self.config.config {
                script.push_str(&format!("config {key} = {}\n", serde_json::to_string(value)?));
            }
            script.push('\n');
        }

        for line in writer.lines()? {
            script.push_str(&line);
            script.push('\n');
        }
        script.push('\n');

        script.push_str(&format!("module {GRAPH_FILE}\n"));
        script.push_str(&format!("options {}\n\n", serde_json::to_string(&request.options)?));

        let entry = EntryPoint {
            command: request.command,
            accuracy: request.resolved_accuracy(),
            save_dir: request.save_dir.map(Path::to_path_buf),
            check_str: request.check_str.map(str::to_string),
        };
        script.push_str(&format!("run_repro {}\n", entry.to_json()));

        Ok(ReproUnit {
            script,
            graph: request.graph.clone(),
        })
    }

    fn write_header(&self, script: &mut String, compiler_name: &str) {
        script.push_str(SHEBANG);
        script.push('\n');
        script.push_str("# graphrepro repro script (replay with: graphrepro <file> [command])\n");
        if !self.config.stable_output {
            script.push_str(&format!("# graphrepro version: {}\n", env!("CARGO_PKG_VERSION")));
        }
        script.push_str(&format!("# input format version: {FORMAT_VERSION}\n"));
        script.push_str(&format!("# compiler: {compiler_name}\n"));
        if !self.config.stable_output {
            script.push_str(&format!("# generated at: {}\n", Utc::now().to_rfc3339()));
            for line in DeviceInfo::detect().comment_lines() {
                script.push_str(&format!("# {line}\n"));
            }
        }
        script.push_str("#\n");
        script.push_str("# To reconstruct the inputs without compiling:\n");
        script.push_str(&format!("#     graphrepro {SCRIPT_FILE} get_args\n\n"));
    }

    /// Assembles `request` and writes it into `dir`.
    pub fn save_graph_repro(&self, dir: &Path, request: &ReproRequest<'_>) -> Result<PathBuf> {
        let unit = self.assemble(request)?;
        let path = unit.write_to_directory(dir)?;
        info!(path = %path.display(), nodes = request.graph.len(), "saved repro script");
        Ok(path)
    }

    /// Persists a failure as a `minify` unit under `<save_dir>/checkpoints`.
    pub fn dump_to_minify(&self, request: &ReproRequest<'_>) -> Result<PathBuf> {
        let save_dir = request
            .save_dir
            .ok_or(ScriptError::MissingSaveDir("dump a failure for minification"))?;
        let request = request.clone().with_command(ReproCommand::Minify);
        self.save_graph_repro(&checkpoint_dir(save_dir, "minify"), &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ReproScript;
    use graphrepro_core::{DType, Device, GraphError, OpKind, SymInt, Tensor};

    fn graph() -> Graph {
        Graph::new("g")
            .with_placeholder("x")
            .with_placeholder("s0")
            .with_node("y", OpKind::Mul, ["x", "s0"])
            .with_output("y")
    }

    fn args() -> Vec<Value> {
        let values: Vec<f64> = (0..16).map(f64::from).collect();
        vec![
            Tensor::from_values(vec![4, 4], &values, DType::F32, Device::Cpu)
                .unwrap()
                .into(),
            SymInt::new("s0", 4).into(),
        ]
    }

    fn stable() -> ReproScriptAssembler {
        ReproScriptAssembler::with_config(AssemblerConfig::default().with_stable_output(true))
    }

    #[test]
    fn test_stable_output_is_reproducible() {
        let (graph, args) = (graph(), args());
        let request = ReproRequest::new(&graph, &args, "reference");
        let a = stable().assemble(&request).unwrap();
        let b = stable().assemble(&request).unwrap();
        assert_eq!(a.script(), b.script());
        assert!(!a.script().contains("generated at"));
        assert!(!a.script().contains("graphrepro version"));
        assert!(a.script().starts_with(SHEBANG));
    }

    #[test]
    fn test_unstable_output_has_environment() {
        let (graph, args) = (graph(), args());
        let unit = ReproScriptAssembler::new()
            .assemble(&ReproRequest::new(&graph, &args, "reference"))
            .unwrap();
        assert!(unit.script().contains("# generated at: "));
        assert!(unit.script().contains("# device info: "));
    }

    #[test]
    fn test_config_lines_sorted() {
        let (graph, args) = (graph(), args());
        let mut config = BTreeMap::new();
        config.insert("zeta".to_string(), serde_json::json!(1));
        config.insert("alpha".to_string(), serde_json::json!("x"));
        let assembler = ReproScriptAssembler::with_config(
            AssemblerConfig::default().with_stable_output(true).with_config(config),
        );
        let unit = assembler.assemble(&ReproRequest::new(&graph, &args, "c")).unwrap();
        let alpha = unit.script().find("config alpha = \"x\"").unwrap();
        let zeta = unit.script().find("config zeta = 1").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_arity_mismatch() {
        let graph = graph();
        let err = stable()
            .assemble(&ReproRequest::new(&graph, &[], "reference"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Arity { expected: 2, found: 0 }));
    }

    #[test]
    fn test_placeholder_names_must_be_single_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Graph::new("g")
            .with_placeholder("my x")
            .with_placeholder("s0")
            .with_node("y", OpKind::Mul, ["my x", "s0"])
            .with_output("y");
        let args = args();
        let request = ReproRequest::new(&graph, &args, "reference").with_save_dir(Some(dir.path()));

        let err = stable().save_graph_repro(&dir.path().join("unit"), &request).unwrap_err();
        assert!(matches!(err, ScriptError::Graph(GraphError::InvalidName(ref n)) if n == "my x"));
        assert!(!dir.path().join("unit").exists());
        assert!(!dir.path().join("storages").exists());
    }

    #[test]
    fn test_accuracy_defaults_from_compiler_name() {
        let (graph, args) = (graph(), args());
        let unit = stable()
            .assemble(&ReproRequest::new(&graph, &args, "inductor_accuracy"))
            .unwrap();
        assert!(unit.script().contains(r#""accuracy":"accuracy""#));

        let unit = stable()
            .assemble(&ReproRequest::new(&graph, &args, "inductor_accuracy").with_accuracy(Some(AccuracyMode::Off)))
            .unwrap();
        assert!(unit.script().contains(r#""accuracy":"""#));
    }

    #[test]
    fn test_write_and_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, args) = (graph(), args());
        let request = ReproRequest::new(&graph, &args, "reference")
            .with_save_dir(Some(dir.path()))
            .with_command(ReproCommand::GetArgs)
            .with_check_str(Some("kernel launch"));
        let path = stable().save_graph_repro(&dir.path().join("unit"), &request).unwrap();

        assert!(path.ends_with(SCRIPT_FILE));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let script = ReproScript::load(&path).unwrap();
        assert_eq!(script.compiler.as_deref(), Some("reference"));
        assert_eq!(script.inputs.len(), 2);
        assert_eq!(script.entry.command, ReproCommand::GetArgs);
        assert_eq!(script.entry.check_str.as_deref(), Some("kernel launch"));
        assert_eq!(script.entry.save_dir.as_deref(), Some(dir.path()));
        assert_eq!(script.load_module().unwrap(), graph);
        // the 4x4 tensor went to a side file
        assert!(dir.path().join("storages").is_dir());
    }

    #[test]
    fn test_dump_to_minify() {
        let dir = tempfile::tempdir().unwrap();
        let (graph, args) = (graph(), args());
        let request = ReproRequest::new(&graph, &args, "reference").with_save_dir(Some(dir.path()));
        let path = stable().dump_to_minify(&request).unwrap();
        assert!(path.starts_with(dir.path().join(CHECKPOINT_DIR)));
        assert_eq!(ReproScript::load(&path).unwrap().entry.command, ReproCommand::Minify);

        let no_dir = ReproRequest::new(&graph, &args, "reference");
        assert!(matches!(
            stable().dump_to_minify(&no_dir),
            Err(ScriptError::MissingSaveDir(_))
        ));
    }
}
