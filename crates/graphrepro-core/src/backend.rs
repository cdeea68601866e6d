//! Contracts for the collaborators the harness drives.
//!
//! Export, compilation, loading and numerical comparison are black boxes to
//! the replay machinery. They are modelled as traits so a real compiler
//! backend can be plugged in and tests can inject failing ones.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BackendError;
use crate::graph::Graph;
use crate::value::{Device, Value};

/// Something that can be called with graph inputs.
pub trait Runnable {
    fn run(&self, args: &[Value]) -> Result<Vec<Value>, BackendError>;
}

/// Turns a module plus example inputs into a canonical frozen graph.
pub trait Exporter {
    fn export(&self, graph: &Graph, args: &[Value]) -> Result<Graph, BackendError>;
}

/// A compiled artifact, opaque to the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactHandle {
    /// Artifact written to disk (a shared library, a package directory, ...).
    Path(PathBuf),
    /// Artifact kept in memory.
    Bytes(Vec<u8>),
}

/// Configuration handed to every compile call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Compiler option overrides captured with the repro.
    pub patches: BTreeMap<String, serde_json::Value>,

    /// Emit per-node diagnostics from the compiled artifact.
    pub generate_intermediate_hooks: bool,
}

impl CompileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patches(mut self, patches: BTreeMap<String, serde_json::Value>) -> Self {
        self.patches = patches;
        self
    }

    pub fn with_intermediate_hooks(mut self, enabled: bool) -> Self {
        self.generate_intermediate_hooks = enabled;
        self
    }
}

/// The compiler backend under test.
pub trait Compiler {
    /// Name recorded in generated repro scripts.
    fn name(&self) -> &str;

    fn compile(
        &self,
        graph: &Graph,
        args: &[Value],
        config: &CompileConfig,
    ) -> Result<ArtifactHandle, BackendError>;

    fn load(&self, artifact: &ArtifactHandle, device: &str) -> Result<Box<dyn Runnable>, BackendError>;

    /// Blocks until queued work on `device` has finished, surfacing
    /// asynchronous faults.
    fn synchronize(&self, _device: Device) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Decides whether two output lists agree.
pub trait OutputComparator {
    fn same(&self, expected: &[Value], actual: &[Value]) -> bool;
}

/// Element-wise `|a - b| <= atol + rtol * |b|` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllClose {
    pub rtol: f64,
    pub atol: f64,
    /// Only compare floating point tensors.
    pub ignore_non_fp: bool,
}

impl Default for AllClose {
    fn default() -> Self {
        Self {
            rtol: 1e-4,
            atol: 1e-5,
            ignore_non_fp: false,
        }
    }
}

impl AllClose {
    fn close(&self, a: f64, b: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return a.is_nan() && b.is_nan();
        }
        if a == b {
            return true;
        }
        (a - b).abs() <= self.atol + self.rtol * b.abs()
    }

    fn same_value(&self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::Tensor(e), Value::Tensor(a)) => {
                if self.ignore_non_fp && !e.dtype().is_floating_point() {
                    return true;
                }
                e.shape() == a.shape()
                    && e.to_f64_vec()
                        .into_iter()
                        .zip(a.to_f64_vec())
                        .all(|(x, y)| self.close(y, x))
            }
            (e, a) => match (e.as_scalar(), a.as_scalar()) {
                (Some(x), Some(y)) => self.close(y, x),
                _ => e == a,
            },
        }
    }
}

impl OutputComparator for AllClose {
    fn same(&self, expected: &[Value], actual: &[Value]) -> bool {
        expected.len() == actual.len()
            && expected
                .iter()
                .zip(actual)
                .all(|(e, a)| self.same_value(e, a))
    }
}

/// Runs both modules on `args` and compares their outputs.
///
/// An eager failure means the reference cannot be judged, so the models
/// count as the same. A compiled failure is returned as an error.
pub fn same_two_models(
    eager: &dyn Runnable,
    compiled: &dyn Runnable,
    args: &[Value],
    comparator: &dyn OutputComparator,
) -> Result<bool, BackendError> {
    let expected = match eager.run(args) {
        Ok(outputs) => outputs,
        Err(e) => {
            warn!(error = %e, "eager run failed, skipping accuracy comparison");
            return Ok(true);
        }
    };
    let actual = compiled.run(args)?;
    Ok(comparator.same(&expected, &actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DType, Tensor};

    struct Fixed(Result<Vec<Value>, BackendError>);

    impl Runnable for Fixed {
        fn run(&self, _args: &[Value]) -> Result<Vec<Value>, BackendError> {
            self.0.clone()
        }
    }

    fn t(values: &[f64]) -> Value {
        Tensor::from_values(vec![values.len()], values, DType::F32, Device::Cpu)
            .unwrap()
            .into()
    }

    #[test]
    fn test_allclose_tolerances() {
        let cmp = AllClose::default();
        assert!(cmp.same(&[t(&[1.0, 2.0])], &[t(&[1.0, 2.0 + 1e-6])]));
        assert!(!cmp.same(&[t(&[1.0, 2.0])], &[t(&[1.0, 2.5])]));
        assert!(!cmp.same(&[t(&[1.0])], &[t(&[1.0, 1.0])]));
        assert!(!cmp.same(&[t(&[1.0])], &[]));
        assert!(cmp.same(&[t(&[f64::NAN])], &[t(&[f64::NAN])]));
    }

    #[test]
    fn test_allclose_ignore_non_fp() {
        let ints = |v: f64| -> Value {
            Tensor::from_values(vec![1], &[v], DType::I64, Device::Cpu).unwrap().into()
        };
        let strict = AllClose::default();
        let lenient = AllClose {
            ignore_non_fp: true,
            ..AllClose::default()
        };
        assert!(!strict.same(&[ints(1.0)], &[ints(2.0)]));
        assert!(lenient.same(&[ints(1.0)], &[ints(2.0)]));
    }

    #[test]
    fn test_same_two_models() {
        let cmp = AllClose::default();
        let eager = Fixed(Ok(vec![t(&[1.0])]));
        let good = Fixed(Ok(vec![t(&[1.0])]));
        let bad = Fixed(Ok(vec![t(&[3.0])]));
        let crash = Fixed(Err(BackendError::Runtime("boom".into())));

        assert!(same_two_models(&eager, &good, &[], &cmp).unwrap());
        assert!(!same_two_models(&eager, &bad, &[], &cmp).unwrap());
        assert!(same_two_models(&eager, &crash, &[], &cmp).is_err());
        // eager failure cannot be judged
        assert!(same_two_models(&crash, &bad, &[], &cmp).unwrap());
    }

    #[test]
    fn test_compile_config_builder() {
        let mut patches = BTreeMap::new();
        patches.insert("max_autotune".to_string(), serde_json::json!(true));
        let config = CompileConfig::new()
            .with_patches(patches)
            .with_intermediate_hooks(true);
        assert!(config.generate_intermediate_hooks);
        assert_eq!(config.patches["max_autotune"], serde_json::json!(true));
    }
}
