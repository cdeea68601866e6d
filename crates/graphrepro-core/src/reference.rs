//! Interpreter-backed exporter and compiler.
//!
//! These satisfy the collaborator contracts without a real code generator:
//! the "compiled" artifact is the frozen graph plus its compile config, and
//! loading it yields an interpreter. They serve as the default backend of
//! the command-line tool and as the baseline in tests.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{ArtifactHandle, CompileConfig, Compiler, Exporter, Runnable};
use crate::error::BackendError;
use crate::graph::Graph;
use crate::interp::Interpreter;
use crate::value::{Device, Value};

/// Validates a graph against its inputs and strips dead nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceExporter;

impl Exporter for ReferenceExporter {
    fn export(&self, graph: &Graph, args: &[Value]) -> Result<Graph, BackendError> {
        graph
            .validate()
            .map_err(|e| BackendError::Export(e.to_string()))?;
        if graph.placeholders.len() != args.len() {
            return Err(BackendError::Export(format!(
                "graph '{}' takes {} input(s) but {} were supplied",
                graph.name,
                graph.placeholders.len(),
                args.len()
            )));
        }
        let exported = graph.eliminate_dead_code();
        debug!(graph = %graph.name, before = graph.len(), after = exported.len(), "exported graph");
        Ok(exported)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrozenArtifact {
    graph: Graph,
    config: CompileConfig,
}

/// Freezes graphs into in-memory artifacts run by the interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceCompiler;

impl Compiler for ReferenceCompiler {
    fn name(&self) -> &str {
        "reference"
    }

    fn compile(
        &self,
        graph: &Graph,
        args: &[Value],
        config: &CompileConfig,
    ) -> Result<ArtifactHandle, BackendError> {
        graph
            .validate()
            .map_err(|e| BackendError::Compile(e.to_string()))?;
        if graph.placeholders.len() != args.len() {
            return Err(BackendError::Compile(format!(
                "expected {} example input(s), got {}",
                graph.placeholders.len(),
                args.len()
            )));
        }
        let artifact = FrozenArtifact {
            graph: graph.clone(),
            config: config.clone(),
        };
        let bytes = serde_json::to_vec(&artifact).map_err(|e| BackendError::Compile(e.to_string()))?;
        Ok(ArtifactHandle::Bytes(bytes))
    }

    fn load(&self, artifact: &ArtifactHandle, device: &str) -> Result<Box<dyn Runnable>, BackendError> {
        device
            .parse::<Device>()
            .map_err(|e| BackendError::Load(e.to_string()))?;

        let bytes = match artifact {
            ArtifactHandle::Bytes(bytes) => bytes.clone(),
            ArtifactHandle::Path(path) => fs::read(path).map_err(|e| BackendError::Load(e.to_string()))?,
        };
        let artifact: FrozenArtifact =
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Load(e.to_string()))?;

        Ok(Box::new(InterpretedArtifact {
            hooks: artifact.config.generate_intermediate_hooks,
            graph: artifact.graph,
        }))
    }
}

struct InterpretedArtifact {
    graph: Graph,
    hooks: bool,
}

impl Runnable for InterpretedArtifact {
    fn run(&self, args: &[Value]) -> Result<Vec<Value>, BackendError> {
        Interpreter::new(&self.graph)
            .with_intermediate_hooks(self.hooks)
            .run(args)
            .map_err(|e| BackendError::Runtime(e.to_string()))
    }
}
