//! The frozen computational graph.
//!
//! A [`Graph`] is a list of named input placeholders followed by
//! topologically ordered nodes. Graphs are values: every transformation
//! (export, dead-code elimination, shrinking) returns a new graph.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Operations understood by the reference interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Relu,
    Exp,
    Abs,
    Sum,
    Matmul,
    Clone,
}

impl OpKind {
    /// Number of arguments the op takes.
    pub const fn arity(self) -> usize {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Matmul => 2,
            Self::Neg | Self::Relu | Self::Exp | Self::Abs | Self::Sum | Self::Clone => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Neg => "neg",
            Self::Relu => "relu",
            Self::Exp => "exp",
            Self::Abs => "abs",
            Self::Sum => "sum",
            Self::Matmul => "matmul",
            Self::Clone => "clone",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named graph input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
}

/// Checks that `name` can be written as a single token in a repro script.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(GraphError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op: OpKind,
    /// Names of placeholders or earlier nodes.
    pub args: Vec<String>,
}

/// An immutable computational graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub placeholders: Vec<Placeholder>,
    pub nodes: Vec<Node>,
    pub outputs: Vec<String>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            placeholders: Vec::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_placeholder(mut self, name: impl Into<String>) -> Self {
        self.placeholders.push(Placeholder { name: name.into() });
        self
    }

    pub fn with_node<I, S>(mut self, name: impl Into<String>, op: OpKind, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.push(Node {
            name: name.into(),
            op,
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Placeholder names in call order.
    pub fn placeholder_names(&self) -> Vec<&str> {
        self.placeholders.iter().map(|p| p.name.as_str()).collect()
    }

    /// Number of operation nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Checks naming, ordering, arity and outputs.
    pub fn validate(&self) -> Result<()> {
        let mut defined: HashSet<&str> = HashSet::new();

        for placeholder in &self.placeholders {
            validate_name(&placeholder.name)?;
            if !defined.insert(&placeholder.name) {
                return Err(GraphError::DuplicateName(placeholder.name.clone()));
            }
        }

        for node in &self.nodes {
            validate_name(&node.name)?;
            if node.args.len() != node.op.arity() {
                return Err(GraphError::Arity {
                    node: node.name.clone(),
                    op: node.op.to_string(),
                    expected: node.op.arity(),
                    found: node.args.len(),
                });
            }
            if let Some(arg) = node.args.iter().find(|a| !defined.contains(a.as_str())) {
                return Err(GraphError::UnknownReference {
                    node: node.name.clone(),
                    arg: arg.clone(),
                });
            }
            if !defined.insert(&node.name) {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
        }

        if self.outputs.is_empty() {
            return Err(GraphError::NoOutputs(self.name.clone()));
        }
        if let Some(output) = self.outputs.iter().find(|o| !defined.contains(o.as_str())) {
            return Err(GraphError::UnknownOutput(output.clone()));
        }

        Ok(())
    }

    /// Returns a copy without nodes that no output depends on.
    ///
    /// Placeholders are always kept so the call signature does not change.
    pub fn eliminate_dead_code(&self) -> Self {
        let mut live: HashSet<&str> = self.outputs.iter().map(String::as_str).collect();
        for node in self.nodes.iter().rev() {
            if live.contains(node.name.as_str()) {
                live.extend(node.args.iter().map(String::as_str));
            }
        }

        Self {
            name: self.name.clone(),
            placeholders: self.placeholders.clone(),
            nodes: self
                .nodes
                .iter()
                .filter(|n| live.contains(n.name.as_str()))
                .cloned()
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Writes the graph as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reads a graph written by [`Graph::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {}({}):", self.name, self.placeholder_names().join(", "))?;
        for node in &self.nodes {
            writeln!(f, "    {} = {}({})", node.name, node.op, node.args.join(", "))?;
        }
        write!(f, "    return ({})", self.outputs.join(", "))
    }
}
