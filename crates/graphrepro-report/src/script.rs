//! Reading repro scripts back.
//!
//! A script is line oriented. Comment lines start with `#`; every other
//! line starts with a directive keyword:
//!
//! | Directive   | Body                                              |
//! |-------------|---------------------------------------------------|
//! | `config`    | `<key> = <json>`, one configuration entry         |
//! | `inputs`, `tensor`, `symint`, `const` | input statements        |
//! | `module`    | graph artifact path, relative to the script       |
//! | `options`   | JSON object of compile options                    |
//! | `run_repro` | JSON object: command, accuracy, save_dir, check_str |
//!
//! Unknown directives and unknown `run_repro` keys are logged and ignored
//! so scripts from newer writers still replay.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use graphrepro_codec::{LoadArgs, Statement};
use graphrepro_core::{AccuracyMode, Graph, ReproCommand};
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::error::{Result, ScriptError};

/// File name of the script inside a unit directory.
pub const SCRIPT_FILE: &str = "repro.grepro";

/// File name of the graph artifact inside a unit directory.
pub const GRAPH_FILE: &str = "graph.json";

pub const SHEBANG: &str = "#!/usr/bin/env graphrepro";

/// Arguments of the `run_repro` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub command: ReproCommand,
    pub accuracy: AccuracyMode,
    pub save_dir: Option<PathBuf>,
    pub check_str: Option<String>,
}

impl EntryPoint {
    pub fn to_json(&self) -> Json {
        json!({
            "command": self.command.as_str(),
            "accuracy": self.accuracy.as_str(),
            "save_dir": self.save_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
            "check_str": self.check_str,
        })
    }

    /// Reads the entry point arguments, ignoring keys it does not know.
    pub fn from_json(line: usize, value: Json) -> Result<Self> {
        let Json::Object(map) = value else {
            return Err(ScriptError::parse(line, "run_repro expects a JSON object"));
        };

        let mut entry = Self {
            command: ReproCommand::Run,
            accuracy: AccuracyMode::Off,
            save_dir: None,
            check_str: None,
        };

        for (key, value) in map {
            match (key.as_str(), value) {
                ("command", Json::String(s)) => {
                    entry.command = s.parse().map_err(|e: String| ScriptError::parse(line, e))?;
                }
                ("accuracy", Json::String(s)) => {
                    entry.accuracy = s.parse().map_err(|e: String| ScriptError::parse(line, e))?;
                }
                ("accuracy", Json::Bool(flag)) => entry.accuracy = AccuracyMode::from_flag(flag),
                ("save_dir", Json::String(s)) => entry.save_dir = Some(PathBuf::from(s)),
                ("check_str", Json::String(s)) => entry.check_str = Some(s),
                ("accuracy" | "save_dir" | "check_str", Json::Null) => {}
                ("command" | "accuracy" | "save_dir" | "check_str", other) => {
                    return Err(ScriptError::parse(
                        line,
                        format!("run_repro argument '{key}' has unexpected value {other}"),
                    ));
                }
                (unknown, _) => warn!(line, key = unknown, "ignoring unknown run_repro argument"),
            }
        }

        Ok(entry)
    }
}

/// A parsed repro script.
#[derive(Debug, Clone)]
pub struct ReproScript {
    /// Compiler name from the header, if present.
    pub compiler: Option<String>,
    /// Configuration snapshot.
    pub config: BTreeMap<String, Json>,
    pub inputs: LoadArgs,
    /// Resolved path of the graph artifact.
    pub module: PathBuf,
    pub options: BTreeMap<String, Json>,
    pub entry: EntryPoint,
}

impl ReproScript {
    /// Parses script text. Relative module paths resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut compiler = None;
        let mut config = BTreeMap::new();
        let mut inputs = LoadArgs::new();
        let mut module = None;
        let mut options = BTreeMap::new();
        let mut entry = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(comment) = text.strip_prefix('#') {
                if let Some(name) = comment.trim().strip_prefix("compiler:") {
                    compiler = Some(name.trim().to_string());
                }
                continue;
            }

            let (keyword, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
            let rest = rest.trim();
            match keyword {
                "config" => {
                    let (key, value) = rest
                        .split_once('=')
                        .ok_or_else(|| ScriptError::parse(line, "expected 'config <key> = <json>'"))?;
                    let value = serde_json::from_str(value.trim())
                        .map_err(|e| ScriptError::parse(line, format!("config '{}': {e}", key.trim())))?;
                    config.insert(key.trim().to_string(), value);
                }
                "module" if !rest.is_empty() => module = Some(base_dir.join(rest)),
                "options" => options = parse_object(line, rest)?.into_iter().collect(),
                "run_repro" => {
                    let value = serde_json::from_str(rest).map_err(|e| ScriptError::parse(line, e.to_string()))?;
                    entry = Some(EntryPoint::from_json(line, value)?);
                }
                kw if Statement::is_keyword(kw) => inputs.push_line(line, text)?,
                other => warn!(line, directive = other, "ignoring unknown directive"),
            }
        }

        let script = Self {
            compiler,
            config,
            inputs,
            module: module.ok_or(ScriptError::MissingDirective("module"))?,
            options,
            entry: entry.ok_or(ScriptError::MissingDirective("run_repro"))?,
        };
        debug!(inputs = script.inputs.len(), module = %script.module.display(), "parsed repro script");
        Ok(script)
    }

    /// Reads and parses a script file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
    }

    /// Loads the referenced graph artifact.
    pub fn load_module(&self) -> Result<Graph> {
        Ok(Graph::load(&self.module)?)
    }
}

fn parse_object(line: usize, text: &str) -> Result<Map<String, Json>> {
    match serde_json::from_str(text) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(_) => Err(ScriptError::parse(line, "expected a JSON object")),
        Err(e) => Err(ScriptError::parse(line, e.to_string())),
    }
}
