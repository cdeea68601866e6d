//! Reference interpreter that executes graphs eagerly on the host.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::backend::Runnable;
use crate::error::{BackendError, GraphError, Result};
use crate::graph::{Graph, Node, OpKind};
use crate::value::{DType, Scalar, Tensor, Value};

/// Every value produced while interpreting a graph.
#[derive(Debug, Clone)]
pub struct Recording {
    /// Placeholder and node values keyed by name.
    pub values: HashMap<String, Value>,
    /// Graph outputs in declaration order.
    pub outputs: Vec<Value>,
}

/// Executes a [`Graph`] node by node.
pub struct Interpreter<'g> {
    graph: &'g Graph,
    intermediate_hooks: bool,
}

impl<'g> Interpreter<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            intermediate_hooks: false,
        }
    }

    /// Log every intermediate value as it is produced.
    pub fn with_intermediate_hooks(mut self, enabled: bool) -> Self {
        self.intermediate_hooks = enabled;
        self
    }

    /// Runs the graph and returns its outputs.
    pub fn run(&self, args: &[Value]) -> Result<Vec<Value>> {
        Ok(self.run_recording(args)?.outputs)
    }

    /// Runs the graph and returns all intermediate values as well.
    pub fn run_recording(&self, args: &[Value]) -> Result<Recording> {
        self.graph.validate()?;
        if args.len() != self.graph.placeholders.len() {
            return Err(GraphError::ArgumentCount {
                expected: self.graph.placeholders.len(),
                found: args.len(),
            });
        }

        let mut values: HashMap<String, Value> = self
            .graph
            .placeholders
            .iter()
            .zip(args)
            .map(|(p, v)| (p.name.clone(), v.clone()))
            .collect();

        for node in &self.graph.nodes {
            let inputs: Vec<&Value> = node
                .args
                .iter()
                .map(|a| {
                    values.get(a).ok_or_else(|| GraphError::UnknownReference {
                        node: node.name.clone(),
                        arg: a.clone(),
                    })
                })
                .collect::<Result<_>>()?;

            let value = eval(node, &inputs)?;
            if self.intermediate_hooks {
                debug!(graph = %self.graph.name, node = %node.name, op = %node.op, value = %value, "intermediate");
            } else {
                trace!(node = %node.name, op = %node.op, "evaluated");
            }
            values.insert(node.name.clone(), value);
        }

        let outputs = self
            .graph
            .outputs
            .iter()
            .map(|o| {
                values
                    .get(o)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownOutput(o.clone()))
            })
            .collect::<Result<_>>()?;

        Ok(Recording { values, outputs })
    }
}

enum Operand<'a> {
    Tensor(&'a Tensor),
    Scalar { value: f64, integral: bool },
}

fn operand<'a>(node: &Node, value: &'a Value) -> Result<Operand<'a>> {
    match value {
        Value::Tensor(t) => Ok(Operand::Tensor(t)),
        Value::SymInt(s) => Ok(Operand::Scalar {
            value: s.value as f64,
            integral: true,
        }),
        Value::Const(Some(s)) => Ok(Operand::Scalar {
            value: s.as_f64(),
            integral: !matches!(s, Scalar::Float(_)),
        }),
        Value::Const(None) => Err(GraphError::execution(
            &node.name,
            node.op.name(),
            "argument is None",
        )),
    }
}

fn apply_binary(op: OpKind, a: f64, b: f64) -> f64 {
    match op {
        OpKind::Add => a + b,
        OpKind::Sub => a - b,
        OpKind::Mul => a * b,
        OpKind::Div => a / b,
        _ => f64::NAN,
    }
}

fn apply_unary(op: OpKind, a: f64) -> f64 {
    match op {
        OpKind::Neg => -a,
        OpKind::Relu => a.max(0.0),
        OpKind::Exp => a.exp(),
        OpKind::Abs => a.abs(),
        _ => a,
    }
}

fn eval(node: &Node, inputs: &[&Value]) -> Result<Value> {
    match node.op {
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
            binary(node, operand(node, inputs[0])?, operand(node, inputs[1])?)
        }
        OpKind::Neg | OpKind::Relu | OpKind::Exp | OpKind::Abs | OpKind::Clone => {
            unary(node, operand(node, inputs[0])?)
        }
        OpKind::Sum => match operand(node, inputs[0])? {
            Operand::Tensor(t) => {
                let dtype = if t.dtype().is_floating_point() {
                    t.dtype()
                } else {
                    DType::I64
                };
                let total: f64 = t.to_f64_vec().iter().sum();
                Ok(Value::Tensor(Tensor::scalar(total, dtype, t.device())))
            }
            Operand::Scalar { .. } => Err(GraphError::execution(
                &node.name,
                "sum",
                "expected a tensor argument",
            )),
        },
        OpKind::Matmul => matmul(node, inputs[0], inputs[1]),
    }
}

fn result_dtype(op: OpKind, dtype: DType) -> DType {
    if matches!(op, OpKind::Div | OpKind::Exp) && !dtype.is_floating_point() {
        DType::F32
    } else {
        dtype
    }
}

fn binary(node: &Node, lhs: Operand<'_>, rhs: Operand<'_>) -> Result<Value> {
    let op = node.op;
    match (lhs, rhs) {
        (Operand::Tensor(a), Operand::Tensor(b)) if a.shape() == b.shape() => {
            if a.device() != b.device() {
                return Err(GraphError::execution(
                    &node.name,
                    op.name(),
                    format!("expected all tensors on one device, found {} and {}", a.device(), b.device()),
                ));
            }
            let dtype = result_dtype(op, a.dtype().promote(b.dtype()));
            let values: Vec<f64> = a
                .to_f64_vec()
                .into_iter()
                .zip(b.to_f64_vec())
                .map(|(x, y)| apply_binary(op, x, y))
                .collect();
            Ok(Tensor::from_values(a.shape().to_vec(), &values, dtype, a.device())?.into())
        }
        (Operand::Tensor(a), Operand::Tensor(b)) if b.shape().is_empty() => {
            let scalar = b.to_f64_vec().first().copied().unwrap_or(0.0);
            tensor_scalar(op, a, scalar, false)
        }
        (Operand::Tensor(a), Operand::Tensor(b)) if a.shape().is_empty() => {
            let scalar = a.to_f64_vec().first().copied().unwrap_or(0.0);
            tensor_scalar(op, b, scalar, true)
        }
        (Operand::Tensor(a), Operand::Tensor(b)) => Err(GraphError::execution(
            &node.name,
            op.name(),
            format!("shape mismatch: {:?} vs {:?}", a.shape(), b.shape()),
        )),
        (Operand::Tensor(a), Operand::Scalar { value, .. }) => tensor_scalar(op, a, value, false),
        (Operand::Scalar { value, .. }, Operand::Tensor(b)) => tensor_scalar(op, b, value, true),
        (
            Operand::Scalar { value: a, integral: ai },
            Operand::Scalar { value: b, integral: bi },
        ) => {
            let result = apply_binary(op, a, b);
            let scalar = if ai && bi && op != OpKind::Div {
                Scalar::Int(result as i64)
            } else {
                Scalar::Float(result)
            };
            Ok(Value::Const(Some(scalar)))
        }
    }
}

fn tensor_scalar(op: OpKind, tensor: &Tensor, scalar: f64, scalar_first: bool) -> Result<Value> {
    let dtype = result_dtype(op, tensor.dtype());
    let values: Vec<f64> = tensor
        .to_f64_vec()
        .into_iter()
        .map(|x| {
            if scalar_first {
                apply_binary(op, scalar, x)
            } else {
                apply_binary(op, x, scalar)
            }
        })
        .collect();
    Ok(Tensor::from_values(tensor.shape().to_vec(), &values, dtype, tensor.device())?.into())
}

fn unary(node: &Node, input: Operand<'_>) -> Result<Value> {
    match input {
        Operand::Tensor(t) => {
            let dtype = result_dtype(node.op, t.dtype());
            let values: Vec<f64> = t
                .to_f64_vec()
                .into_iter()
                .map(|x| apply_unary(node.op, x))
                .collect();
            let out = Tensor::from_values(t.shape().to_vec(), &values, dtype, t.device())?;
            Ok(out.with_requires_grad(t.requires_grad()).into())
        }
        Operand::Scalar { value, integral } => {
            let result = apply_unary(node.op, value);
            let scalar = if integral && node.op != OpKind::Exp {
                Scalar::Int(result as i64)
            } else {
                Scalar::Float(result)
            };
            Ok(Value::Const(Some(scalar)))
        }
    }
}

fn matmul(node: &Node, lhs: &Value, rhs: &Value) -> Result<Value> {
    let (Some(a), Some(b)) = (lhs.as_tensor(), rhs.as_tensor()) else {
        return Err(GraphError::execution(&node.name, "matmul", "expected tensor arguments"));
    };
    let (&[m, k], &[k2, n]) = (a.shape(), b.shape()) else {
        return Err(GraphError::execution(
            &node.name,
            "matmul",
            format!("expected 2-D operands, found {:?} and {:?}", a.shape(), b.shape()),
        ));
    };
    if k != k2 {
        return Err(GraphError::execution(
            &node.name,
            "matmul",
            format!("inner dimensions differ: {k} vs {k2}"),
        ));
    }
    if a.device() != b.device() {
        return Err(GraphError::execution(&node.name, "matmul", "operands on different devices"));
    }

    let av = a.to_f64_vec();
    let bv = b.to_f64_vec();
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let x = av[i * k + p];
            for j in 0..n {
                out[i * n + j] += x * bv[p * n + j];
            }
        }
    }
    let dtype = a.dtype().promote(b.dtype());
    Ok(Tensor::from_values(vec![m, n], &out, dtype, a.device())?.into())
}

/// The uncompiled graph, runnable through the interpreter.
#[derive(Debug, Clone)]
pub struct EagerModule {
    graph: Graph,
}

impl EagerModule {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Runnable for EagerModule {
    fn run(&self, args: &[Value]) -> std::result::Result<Vec<Value>, BackendError> {
        Interpreter::new(&self.graph)
            .run(args)
            .map_err(|e| BackendError::Runtime(e.to_string()))
    }
}
