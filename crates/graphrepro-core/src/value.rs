//! Runtime values bound to graph placeholders.
//!
//! A graph is replayed by calling it with an ordered list of [`Value`]s. The
//! order matches the graph's placeholders and is never rearranged: shape and
//! stride semantics depend on the positional correspondence.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Device type prefixes recognized as accelerators.
pub const ACCELERATOR_PREFIXES: &[&str] = &["cuda"];

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F64,
    F32,
    I64,
    I32,
    U8,
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn itemsize(self) -> usize {
        match self {
            Self::F64 | Self::I64 => 8,
            Self::F32 | Self::I32 => 4,
            Self::U8 | Self::Bool => 1,
        }
    }

    /// Returns true for floating point element types.
    pub const fn is_floating_point(self) -> bool {
        matches!(self, Self::F64 | Self::F32)
    }

    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::I32 => "i32",
            Self::U8 => "u8",
            Self::Bool => "bool",
        }
    }

    /// Result type of a binary operation between two element types.
    pub fn promote(self, other: Self) -> Self {
        const ORDER: [DType; 6] = [DType::F64, DType::F32, DType::I64, DType::I32, DType::U8, DType::Bool];
        ORDER
            .into_iter()
            .find(|d| *d == self || *d == other)
            .unwrap_or(self)
    }

    /// Appends `value` encoded as one little-endian element.
    pub fn encode_into(self, value: f64, out: &mut Vec<u8>) {
        match self {
            Self::F64 => out.extend_from_slice(&value.to_le_bytes()),
            Self::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            Self::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
            Self::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            Self::U8 => out.push(value as u8),
            Self::Bool => out.push(u8::from(value != 0.0)),
        }
    }

    /// Decodes one little-endian element. `bytes` must hold `itemsize()` bytes.
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::F64 => f64::from_le_bytes(bytes.try_into().unwrap_or_default()),
            Self::F32 => f64::from(f32::from_le_bytes(bytes.try_into().unwrap_or_default())),
            Self::I64 => i64::from_le_bytes(bytes.try_into().unwrap_or_default()) as f64,
            Self::I32 => f64::from(i32::from_le_bytes(bytes.try_into().unwrap_or_default())),
            Self::U8 => bytes.first().copied().map_or(0.0, f64::from),
            Self::Bool => {
                if bytes.first().copied().unwrap_or(0) != 0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f64" | "float64" => Ok(Self::F64),
            "f32" | "float32" => Ok(Self::F32),
            "i64" | "int64" => Ok(Self::I64),
            "i32" | "int32" => Ok(Self::I32),
            "u8" | "uint8" => Ok(Self::U8),
            "bool" => Ok(Self::Bool),
            other => Err(GraphError::UnknownDType(other.to_string())),
        }
    }
}

/// Device a tensor lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    Cpu,
    Cuda(Option<u32>),
}

impl Device {
    /// Returns true if work on this device may execute asynchronously.
    pub const fn is_accelerator(self) -> bool {
        matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(None) => f.write_str("cuda"),
            Self::Cuda(Some(index)) => write!(f, "cuda:{index}"),
        }
    }
}

impl FromStr for Device {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "cpu" => Ok(Self::Cpu),
            None if s == "cuda" => Ok(Self::Cuda(None)),
            Some(("cuda", index)) => index
                .parse()
                .map(|i| Self::Cuda(Some(i)))
                .map_err(|_| GraphError::UnknownDevice(s.to_string())),
            _ => Err(GraphError::UnknownDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

/// Row-major strides for a contiguous tensor of the given shape.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1].saturating_mul(shape[dim + 1].max(1));
    }
    strides
}

/// Shape, stride, offset, dtype and device of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorMeta {
    shape: Vec<usize>,
    stride: Vec<usize>,
    storage_offset: usize,
    dtype: DType,
    device: Device,
}

impl TensorMeta {
    /// Metadata for a freshly allocated contiguous tensor.
    pub fn contiguous(shape: Vec<usize>, dtype: DType, device: Device) -> Self {
        let stride = contiguous_strides(&shape);
        Self {
            shape,
            stride,
            storage_offset: 0,
            dtype,
            device,
        }
    }

    /// Metadata for an arbitrary strided view.
    pub fn new(
        shape: Vec<usize>,
        stride: Vec<usize>,
        storage_offset: usize,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        let meta = Self {
            shape,
            stride,
            storage_offset,
            dtype,
            device,
        };
        meta.validate()?;
        Ok(meta)
    }

    fn validate(&self) -> Result<()> {
        if self.shape.len() != self.stride.len() {
            return Err(GraphError::InvalidMeta(format!(
                "rank {} does not match {} stride(s)",
                self.shape.len(),
                self.stride.len()
            )));
        }

        let mut span = self.storage_offset;
        for (&size, &stride) in self.shape.iter().zip(&self.stride) {
            if size == 0 {
                continue;
            }
            span = stride
                .checked_mul(size - 1)
                .and_then(|s| span.checked_add(s))
                .ok_or_else(|| {
                    GraphError::InvalidMeta(format!("stride {stride} overflows for size {size}"))
                })?;
        }
        span.checked_add(1)
            .and_then(|n| n.checked_mul(self.dtype.itemsize()))
            .ok_or_else(|| GraphError::InvalidMeta("storage size overflows".to_string()))?;
        Ok(())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    pub fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of storage elements the view reaches, including the offset.
    pub fn storage_numel(&self) -> usize {
        if self.numel() == 0 {
            return self.storage_offset;
        }
        let span: usize = self
            .shape
            .iter()
            .zip(&self.stride)
            .map(|(&size, &stride)| (size - 1) * stride)
            .sum();
        self.storage_offset + span + 1
    }

    /// Storage size in bytes.
    pub fn storage_nbytes(&self) -> usize {
        self.storage_numel() * self.dtype.itemsize()
    }

    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1usize;
        for (&size, &stride) in self.shape.iter().zip(&self.stride).rev() {
            // Singleton dimensions are contiguous regardless of stride.
            if size == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected = expected.saturating_mul(size);
        }
        true
    }

    /// Storage element indices in logical (row-major) order.
    pub fn storage_indices(&self) -> Vec<usize> {
        let numel = self.numel();
        let mut indices = Vec::with_capacity(numel);
        if numel == 0 {
            return indices;
        }
        let rank = self.shape.len();
        let mut counter = vec![0usize; rank];
        let mut offset = self.storage_offset;
        for _ in 0..numel {
            indices.push(offset);
            for dim in (0..rank).rev() {
                counter[dim] += 1;
                offset += self.stride[dim];
                if counter[dim] < self.shape[dim] {
                    break;
                }
                offset -= self.stride[dim] * counter[dim];
                counter[dim] = 0;
            }
        }
        indices
    }
}

/// A dense, possibly strided tensor with its backing storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    meta: TensorMeta,
    storage: Arc<Vec<u8>>,
    requires_grad: bool,
}

impl Tensor {
    /// Wraps raw little-endian storage bytes in a view described by `meta`.
    pub fn from_storage(meta: TensorMeta, storage: Vec<u8>) -> Result<Self> {
        let needed = meta.storage_nbytes();
        if storage.len() < needed {
            return Err(GraphError::InvalidMeta(format!(
                "storage holds {} byte(s) but the view needs {needed}",
                storage.len()
            )));
        }
        Ok(Self {
            meta,
            storage: Arc::new(storage),
            requires_grad: false,
        })
    }

    /// Builds a contiguous tensor from logical values.
    pub fn from_values(shape: Vec<usize>, values: &[f64], dtype: DType, device: Device) -> Result<Self> {
        let meta = TensorMeta::contiguous(shape, dtype, device);
        if values.len() != meta.numel() {
            return Err(GraphError::InvalidMeta(format!(
                "{} value(s) supplied for {} element(s)",
                values.len(),
                meta.numel()
            )));
        }
        let mut storage = Vec::with_capacity(meta.storage_nbytes());
        for &v in values {
            dtype.encode_into(v, &mut storage);
        }
        Self::from_storage(meta, storage)
    }

    /// A zero-dimensional tensor.
    pub fn scalar(value: f64, dtype: DType, device: Device) -> Self {
        let mut storage = Vec::with_capacity(dtype.itemsize());
        dtype.encode_into(value, &mut storage);
        Self {
            meta: TensorMeta::contiguous(Vec::new(), dtype, device),
            storage: Arc::new(storage),
            requires_grad: false,
        }
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    pub fn shape(&self) -> &[usize] {
        self.meta.shape()
    }

    pub fn stride(&self) -> &[usize] {
        self.meta.stride()
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype()
    }

    pub fn device(&self) -> Device {
        self.meta.device()
    }

    pub fn numel(&self) -> usize {
        self.meta.numel()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// The bytes of the storage the view reaches.
    pub fn storage_bytes(&self) -> &[u8] {
        &self.storage[..self.meta.storage_nbytes()]
    }

    /// Storage elements decoded as `f64`, in storage order.
    pub fn storage_f64(&self) -> Vec<f64> {
        let dtype = self.dtype();
        self.storage_bytes()
            .chunks_exact(dtype.itemsize())
            .map(|chunk| dtype.decode(chunk))
            .collect()
    }

    /// Logical elements decoded as `f64`, in row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let dtype = self.dtype();
        let itemsize = dtype.itemsize();
        self.meta
            .storage_indices()
            .into_iter()
            .map(|i| dtype.decode(&self.storage[i * itemsize..(i + 1) * itemsize]))
            .collect()
    }
}

/// A scalar constant.
///
/// Non-finite floats are written as the strings `"inf"`, `"-inf"` and
/// `"nan"`, since JSON has no literal for them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "ScalarRepr", try_from = "ScalarRepr")]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ScalarRepr {
    Int(i64),
    Float(f64),
    Bool(bool),
    NonFinite(String),
}

impl From<Scalar> for ScalarRepr {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Int(v) => Self::Int(v),
            Scalar::Bool(v) => Self::Bool(v),
            Scalar::Float(v) if v.is_nan() => Self::NonFinite("nan".to_string()),
            Scalar::Float(v) if v == f64::INFINITY => Self::NonFinite("inf".to_string()),
            Scalar::Float(v) if v == f64::NEG_INFINITY => Self::NonFinite("-inf".to_string()),
            Scalar::Float(v) => Self::Float(v),
        }
    }
}

impl TryFrom<ScalarRepr> for Scalar {
    type Error = String;

    fn try_from(repr: ScalarRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ScalarRepr::Int(v) => Ok(Self::Int(v)),
            ScalarRepr::Float(v) => Ok(Self::Float(v)),
            ScalarRepr::Bool(v) => Ok(Self::Bool(v)),
            ScalarRepr::NonFinite(s) => match s.as_str() {
                "inf" => Ok(Self::Float(f64::INFINITY)),
                "-inf" => Ok(Self::Float(f64::NEG_INFINITY)),
                "nan" => Ok(Self::Float(f64::NAN)),
                other => Err(format!("unknown scalar '{other}'")),
            },
        }
    }
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
            Self::Bool(v) => f64::from(u8::from(v)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A symbolic integer bound to the concrete value observed at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymInt {
    pub symbol: String,
    pub value: i64,
}

impl SymInt {
    pub fn new(symbol: impl Into<String>, value: i64) -> Self {
        Self {
            symbol: symbol.into(),
            value,
        }
    }
}

/// A value bound to one graph placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    SymInt(SymInt),
    /// A constant; `None` is the no-value case.
    Const(Option<Scalar>),
}

impl Value {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Integer view of a symbolic integer or an integer constant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::SymInt(s) => Some(s.value),
            Self::Const(Some(Scalar::Int(v))) => Some(*v),
            _ => None,
        }
    }

    /// Scalar view of a symbolic integer or scalar constant.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::SymInt(s) => Some(s.value as f64),
            Self::Const(Some(s)) => Some(s.as_f64()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::SymInt(_) => "symint",
            Self::Const(_) => "const",
        }
    }

    /// Returns true for a tensor on an accelerator device.
    pub fn on_accelerator(&self) -> bool {
        matches!(self, Self::Tensor(t) if t.device().is_accelerator())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(t) => write!(
                f,
                "tensor(shape={:?}, stride={:?}, dtype={}, device={})",
                t.shape(),
                t.stride(),
                t.dtype(),
                t.device()
            ),
            Self::SymInt(s) => write!(f, "symint({}={})", s.symbol, s.value),
            Self::Const(None) => f.write_str("None"),
            Self::Const(Some(s)) => write!(f, "const({s})"),
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Self::Tensor(tensor)
    }
}

impl From<SymInt> for Value {
    fn from(symint: SymInt) -> Self {
        Self::SymInt(symint)
    }
}

/// The fixed-arity argument tuple a graph is called with.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs(Arc<[Value]>);

impl CallArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into())
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Returns true if any argument is a tensor on an accelerator.
    pub fn any_on_accelerator(&self) -> bool {
        self.0.iter().any(Value::on_accelerator)
    }
}

impl Deref for CallArgs {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}
