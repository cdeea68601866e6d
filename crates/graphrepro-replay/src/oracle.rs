//! Deciding whether a graph still fails.
//!
//! The same compile, load and execute attempt backs two call sites. A plain
//! `run` surfaces its error to the user; minimization turns it into a yes or
//! no answer through [`FailureOracle::module_fails`], which only looks for
//! raised errors.

use graphrepro_core::{
    same_two_models, AccuracyMode, CompileConfig, Compiler, Device, EagerModule, FailureVerdict, Graph,
    OutputComparator, Runnable, Value,
};
use tracing::{debug, trace};

use crate::error::{ReproError, Result};

/// First accelerator device any tensor argument lives on.
pub(crate) fn accelerator_device(args: &[Value]) -> Option<Device> {
    args.iter()
        .filter_map(Value::as_tensor)
        .map(|t| t.device())
        .find(|d| d.is_accelerator())
}

/// Compiles and runs graphs on one device and classifies the outcome.
///
/// Holds no state that changes between calls, so the minimizer may ask it
/// any number of times.
pub struct FailureOracle<'a> {
    compiler: &'a dyn Compiler,
    comparator: &'a dyn OutputComparator,
    config: CompileConfig,
    device: String,
    accuracy: AccuracyMode,
}

impl<'a> FailureOracle<'a> {
    pub fn new(compiler: &'a dyn Compiler, comparator: &'a dyn OutputComparator, device: impl Into<String>) -> Self {
        Self {
            compiler,
            comparator,
            config: CompileConfig::new(),
            device: device.into(),
            accuracy: AccuracyMode::Off,
        }
    }

    pub fn with_config(mut self, config: CompileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_accuracy(mut self, accuracy: AccuracyMode) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Compiles `graph`, loads it and executes it once.
    ///
    /// With accuracy checking on, the compiled output is compared against the
    /// uncompiled graph and a disagreement is [`ReproError::AccuracyMismatch`].
    /// Otherwise the compiled artifact runs alone and, when an input lives on
    /// an accelerator, the device is synchronized so asynchronous faults
    /// surface here.
    ///
    /// # Errors
    ///
    /// * `ReproError::Backend` - Compilation, loading or execution raised.
    /// * `ReproError::AccuracyMismatch` - Outputs differ beyond tolerance.
    pub fn check(&self, graph: &Graph, args: &[Value]) -> Result<()> {
        let compiled = self.compile_and_load(graph, args)?;

        if self.accuracy.is_enabled() {
            let eager = EagerModule::new(graph.clone());
            if !same_two_models(&eager, compiled.as_ref(), args, self.comparator)? {
                return Err(ReproError::AccuracyMismatch);
            }
            return Ok(());
        }

        self.run_once(compiled.as_ref(), args)
    }

    pub fn classify(&self, graph: &Graph, args: &[Value]) -> FailureVerdict {
        match self.check(graph, args) {
            Ok(()) => FailureVerdict::NoFailure,
            Err(ReproError::AccuracyMismatch) => FailureVerdict::AccuracyMismatch,
            Err(e) => FailureVerdict::Crash(e.to_string()),
        }
    }

    /// Returns true if compiling, loading or executing `graph` once raises
    /// and, when `check_str` is set, the error text contains it.
    ///
    /// Only errors count here; outputs are never compared, whatever the
    /// accuracy mode.
    pub fn module_fails(&self, graph: &Graph, args: &[Value], check_str: Option<&str>) -> bool {
        let outcome = self
            .compile_and_load(graph, args)
            .and_then(|compiled| self.run_once(compiled.as_ref(), args));
        let verdict = match outcome {
            Ok(()) => FailureVerdict::NoFailure,
            Err(e) => FailureVerdict::Crash(e.to_string()),
        };
        let fails = verdict.matches(check_str);
        debug!(nodes = graph.len(), %verdict, check_str, fails, "oracle verdict");
        fails
    }

    fn compile_and_load(&self, graph: &Graph, args: &[Value]) -> Result<Box<dyn Runnable>> {
        let artifact = self.compiler.compile(graph, args, &self.config)?;
        Ok(self.compiler.load(&artifact, &self.device)?)
    }

    fn run_once(&self, compiled: &dyn Runnable, args: &[Value]) -> Result<()> {
        compiled.run(args)?;
        if let Some(device) = accelerator_device(args) {
            trace!(%device, "synchronizing after compiled run");
            self.compiler.synchronize(device)?;
        }
        Ok(())
    }
}
