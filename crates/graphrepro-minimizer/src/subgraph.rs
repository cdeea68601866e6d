//! Extraction of a sub-graph from a subset of nodes.

use std::collections::HashSet;

use graphrepro_core::{Graph, Placeholder, Value};

use crate::error::Result;
use crate::intermediates::IntermediateStore;

/// A candidate graph together with the inputs it must be called with.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub graph: Graph,
    pub args: Vec<Value>,
}

/// Builds the graph made of the nodes at `keep` (indices into `graph.nodes`).
///
/// Values the kept nodes read from removed nodes become new placeholders fed
/// with the removed nodes' eager values. Original placeholders that are
/// still used keep their relative order and come first. Every kept node
/// whose value no other kept node reads is an output, as is every kept
/// original output.
pub fn extract(
    graph: &Graph,
    args: &[Value],
    keep: &[usize],
    intermediates: &IntermediateStore,
) -> Result<Candidate> {
    let mut keep: Vec<usize> = keep.iter().copied().filter(|&i| i < graph.nodes.len()).collect();
    keep.sort_unstable();
    keep.dedup();

    let kept_names: HashSet<&str> = keep.iter().map(|&i| graph.nodes[i].name.as_str()).collect();
    let placeholder_names: HashSet<&str> = graph.placeholders.iter().map(|p| p.name.as_str()).collect();

    let mut used_placeholders: HashSet<&str> = HashSet::new();
    let mut boundary: Vec<&str> = Vec::new();
    let mut consumed: HashSet<&str> = HashSet::new();

    for &i in &keep {
        for arg in &graph.nodes[i].args {
            let arg = arg.as_str();
            if placeholder_names.contains(arg) {
                used_placeholders.insert(arg);
            } else if kept_names.contains(arg) {
                consumed.insert(arg);
            } else if !boundary.contains(&arg) {
                boundary.push(arg);
            }
        }
    }

    let mut sub = Graph::new(graph.name.clone());
    let mut sub_args = Vec::new();

    for (placeholder, value) in graph.placeholders.iter().zip(args) {
        if used_placeholders.contains(placeholder.name.as_str()) {
            sub.placeholders.push(placeholder.clone());
            sub_args.push(value.clone());
        }
    }
    for name in &boundary {
        sub.placeholders.push(Placeholder {
            name: (*name).to_string(),
        });
        sub_args.push(intermediates.get(name)?);
    }

    let original_outputs: HashSet<&str> = graph.outputs.iter().map(String::as_str).collect();
    for &i in &keep {
        let node = &graph.nodes[i];
        sub.nodes.push(node.clone());
        if !consumed.contains(node.name.as_str()) || original_outputs.contains(node.name.as_str()) {
            sub.outputs.push(node.name.clone());
        }
    }

    Ok(Candidate {
        graph: sub,
        args: sub_args,
    })
}
