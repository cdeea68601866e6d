//! The line-oriented statement format.
//!
//! Each input is one line: a keyword, the placeholder name and a JSON body.
//!
//! ```text
//! inputs version 0
//! tensor x {"shape":[4,4],"stride":[4,1],"dtype":"f32","device":"cpu","fill":{...}}
//! symint s0 {"symbol":"s0","value":4}
//! const flag {}
//! ```

use graphrepro_core::{DType, Device, GraphError, Scalar, SymInt, TensorMeta};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::random::RandomRecipe;

/// Version written by this encoder.
pub const FORMAT_VERSION: u32 = 0;

/// Tensors with at most this many storage elements are stored inline.
pub const MAX_CONSTANT_NUMEL_INLINE: usize = 4;

/// How a tensor's storage is reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FillSpec {
    /// Base64 of the little-endian storage bytes.
    Inline { data: String },
    /// Side file named by content hash; the recipe is used if it is missing.
    Storage {
        hash: String,
        nbytes: usize,
        recipe: RandomRecipe,
    },
    /// Regenerated from the recipe alone.
    Random { recipe: RandomRecipe },
}

/// Body of a `tensor` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub stride: Vec<usize>,
    #[serde(default)]
    pub storage_offset: usize,
    pub dtype: DType,
    pub device: Device,
    #[serde(default)]
    pub requires_grad: bool,
    pub fill: FillSpec,
}

impl TensorSpec {
    pub fn meta(&self) -> std::result::Result<TensorMeta, GraphError> {
        TensorMeta::new(
            self.shape.clone(),
            self.stride.clone(),
            self.storage_offset,
            self.dtype,
            self.device,
        )
    }
}

/// Body of a `const` statement. An absent value is the None constant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Version(u32),
    Tensor { name: String, spec: TensorSpec },
    SymInt { name: String, spec: SymInt },
    Const { name: String, spec: ConstSpec },
}

impl Statement {
    /// Keywords this codec understands.
    pub const KEYWORDS: [&'static str; 4] = ["inputs", "tensor", "symint", "const"];

    pub fn is_keyword(word: &str) -> bool {
        Self::KEYWORDS.contains(&word)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Version(_) => "inputs",
            Self::Tensor { .. } => "tensor",
            Self::SymInt { .. } => "symint",
            Self::Const { .. } => "const",
        }
    }

    /// Placeholder the statement binds, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Version(_) => None,
            Self::Tensor { name, .. } | Self::SymInt { name, .. } | Self::Const { name, .. } => Some(name),
        }
    }

    pub fn render(&self) -> Result<String> {
        Ok(match self {
            Self::Version(v) => format!("inputs version {v}"),
            Self::Tensor { name, spec } => format!("tensor {name} {}", serde_json::to_string(spec)?),
            Self::SymInt { name, spec } => format!("symint {name} {}", serde_json::to_string(spec)?),
            Self::Const { name, spec } => format!("const {name} {}", serde_json::to_string(spec)?),
        })
    }

    /// Parses one line. Returns `Ok(None)` for blank lines, comments and
    /// keywords this codec does not know.
    pub fn parse(line: usize, text: &str) -> Result<Option<Self>> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(None);
        }
        let (keyword, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let rest = rest.trim();

        let statement = match keyword {
            "inputs" => {
                let version = rest
                    .strip_prefix("version")
                    .map(str::trim)
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| CodecError::malformed(line, keyword, "expected 'inputs version <N>'"))?;
                Self::Version(version)
            }
            "tensor" => {
                let (name, body) = split_body(line, keyword, rest)?;
                Self::Tensor {
                    name,
                    spec: parse_body(line, keyword, body)?,
                }
            }
            "symint" => {
                let (name, body) = split_body(line, keyword, rest)?;
                Self::SymInt {
                    name,
                    spec: parse_body(line, keyword, body)?,
                }
            }
            "const" => {
                let (name, body) = split_body(line, keyword, rest)?;
                Self::Const {
                    name,
                    spec: parse_body(line, keyword, body)?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(statement))
    }
}

fn split_body<'a>(line: usize, keyword: &str, rest: &'a str) -> Result<(String, &'a str)> {
    rest.split_once(char::is_whitespace)
        .map(|(name, body)| (name.to_string(), body.trim()))
        .ok_or_else(|| CodecError::malformed(line, keyword, "expected '<placeholder> <json>'"))
}

fn parse_body<T: serde::de::DeserializeOwned>(line: usize, keyword: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| CodecError::malformed(line, keyword, e.to_string()))
}
