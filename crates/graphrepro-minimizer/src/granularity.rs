//! Delta debugging over graph nodes with halving chunk sizes.
//!
//! The search starts with chunks of `max_granularity` nodes (or the next
//! power of two of the node count) and halves the chunk size whenever no
//! chunk can be isolated or removed. At each size it first tries to keep a
//! single chunk, then to drop a single chunk. Every accepted shrink
//! restarts the pass at the same size.

use std::time::Instant;

use graphrepro_core::{Graph, Interpreter, Value};
use tracing::{debug, info, trace};

use crate::error::{MinimizerError, Result};
use crate::intermediates::IntermediateStore;
use crate::result::{MinifiedGraph, MinimizationStats};
use crate::subgraph::{extract, Candidate};
use crate::traits::{DumpState, FailurePredicate, Minifier, MinifierConfig};

/// Default graph minimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GranularityMinifier;

impl GranularityMinifier {
    pub fn new() -> Self {
        Self
    }

    /// Split `nodes` into chunks of at most `size` elements.
    fn split_into_chunks(nodes: &[usize], size: usize) -> Vec<Vec<usize>> {
        if size == 0 || nodes.is_empty() {
            return vec![];
        }
        nodes.chunks(size).map(<[usize]>::to_vec).collect()
    }

    /// All nodes except the i-th chunk.
    fn get_complement(chunks: &[Vec<usize>], i: usize) -> Vec<usize> {
        chunks
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != i)
            .flat_map(|(_, chunk)| chunk.iter().copied())
            .collect()
    }

    fn try_candidate(
        graph: &Graph,
        args: &[Value],
        keep: &[usize],
        store: &IntermediateStore,
        predicate: &dyn FailurePredicate,
        dump: &mut dyn DumpState,
        stats: &mut MinimizationStats,
    ) -> Result<Option<Candidate>> {
        let candidate = extract(graph, args, keep, store)?;
        stats.record_check();
        if predicate.fails(&candidate.graph, &candidate.args) {
            stats.record_accepted(candidate.graph.len());
            dump.dump_state(&candidate.graph, &candidate.args)?;
            stats.record_dump();
            Ok(Some(candidate))
        } else {
            stats.record_rejected();
            Ok(None)
        }
    }
}

impl Minifier for GranularityMinifier {
    fn minify(
        &self,
        graph: &Graph,
        args: &[Value],
        config: &MinifierConfig,
        predicate: &dyn FailurePredicate,
        dump: &mut dyn DumpState,
    ) -> Result<MinifiedGraph> {
        config.validate()?;
        if graph.is_empty() {
            return Err(MinimizerError::EmptyGraph);
        }

        let start = Instant::now();
        let mut stats = MinimizationStats::new(graph.len());

        if !config.skip_sanity {
            stats.record_check();
            if !predicate.fails(graph, args) {
                return Err(MinimizerError::NoFailure);
            }
        }

        let recording = Interpreter::new(graph)
            .run_recording(args)
            .map_err(|e| MinimizerError::Eager(e.to_string()))?;
        let store = match config.offload_dir() {
            Some(dir) => IntermediateStore::offload(recording, &dir, config.skip_saving_eager_intermediates)?,
            None => IntermediateStore::in_memory(recording),
        };

        let mut current: Vec<usize> = (0..graph.len()).collect();
        let mut best = Candidate {
            graph: graph.clone(),
            args: args.to_vec(),
        };
        let mut granularity = config
            .max_granularity
            .unwrap_or_else(|| graph.len().next_power_of_two());

        info!(nodes = graph.len(), granularity, offloaded = store.is_offloaded(), "starting minification");

        while granularity > 0 {
            let chunks = Self::split_into_chunks(&current, granularity);
            trace!(granularity, nodes = current.len(), chunks = chunks.len(), "minifier pass");
            let mut reduced = false;

            if chunks.len() > 1 {
                // Try reducing to subsets (individual chunks)
                for chunk in &chunks {
                    if let Some(candidate) =
                        Self::try_candidate(graph, args, chunk, &store, predicate, dump, &mut stats)?
                    {
                        debug!(kept = chunk.len(), removed = current.len() - chunk.len(), "reduced to subset");
                        current = chunk.clone();
                        best = candidate;
                        reduced = true;
                        break;
                    }
                }

                // Try reducing to complements (removing individual chunks)
                if !reduced {
                    for i in 0..chunks.len() {
                        let complement = Self::get_complement(&chunks, i);
                        if let Some(candidate) =
                            Self::try_candidate(graph, args, &complement, &store, predicate, dump, &mut stats)?
                        {
                            debug!(chunk_index = i, removed = chunks[i].len(), "reduced to complement");
                            current = complement;
                            best = candidate;
                            reduced = true;
                            break;
                        }
                    }
                }
            }

            if !reduced {
                granularity /= 2;
                stats.record_granularity_step();
            }
        }

        dump.dump_state(&best.graph, &best.args)?;
        stats.record_dump();
        stats.minimized_nodes = best.graph.len();
        stats.duration = Some(start.elapsed());
        info!(%stats, "minification complete");

        Ok(MinifiedGraph {
            graph: best.graph,
            args: best.args,
            stats,
        })
    }

    fn name(&self) -> &str {
        "granularity"
    }
}
