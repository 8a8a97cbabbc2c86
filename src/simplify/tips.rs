//! Tip clipping: removal of short dead-end edges.
//!
//! The plain clipper walks candidate edges in ascending coverage order and
//! removes tips accepted by the configured condition. The topology clipper
//! keeps tips only when the junction carries a unique long alternative. The
//! parallel variant is a two-step algorithm: chunked workers mark candidate
//! tips (read-only), then marks are applied under exclusive access, followed
//! by parallel compression and cleaning.

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::graph::{AssemblyGraph, Cleaner, Compressor, CoverageIndex, EdgeId, ParallelCompressor};

use super::conditions::{is_tip, Condition, LengthThresholdFinder};
use super::SimplifInfo;
use crate::utils::configuration::{TipClipperConfig, TopologyTipClipperConfig};

/// Clips tips accepted by the parsed condition. Compresses and cleans the
/// neighbourhood afterwards. Returns whether anything was removed.
pub fn clip_tips(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    tc: &TipClipperConfig,
    _info: &SimplifInfo,
) -> Result<bool> {
    info!("clipping tips");
    let condition =
        Condition::parse(&tc.condition).map_err(|e| anyhow!("tip condition: {e}"))?;
    let max_length = condition.max_length_bound().unwrap_or(usize::MAX);

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) {
            continue;
        }
        if g.edge_length(e) > max_length {
            continue;
        }
        if is_tip(g, e) && condition.eval(g, cov, e) {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("tip clipping removed {removed} tips");
    Ok(removed > 0)
}

/// Topology-based tip clipping: a tip is removed only when the vertex it
/// hangs off carries a unique long (>= uniqueness_length) edge on the
/// opposite side and a plausible (>= plausibility_length) alternative
/// continuation.
pub fn topology_clip_tips(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    ttc: &TopologyTipClipperConfig,
    info: &SimplifInfo,
) -> Result<bool> {
    info!("clipping tips based on topology");
    let max_length =
        LengthThresholdFinder::max_tip_length(info.read_length, g.k(), ttc.length_coeff);

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || !is_tip(g, e) || g.edge_length(e) > max_length {
            continue;
        }
        // junction vertex: the attached (non-dangling) side of the tip
        let junction = if g.out_degree(g.edge_end(e)) == 0 && g.in_degree(g.edge_end(e)) == 1 {
            g.edge_start(e)
        } else {
            g.edge_end(e)
        };
        let unique_backbone = g
            .incoming(junction)
            .into_iter()
            .chain(g.outgoing(junction))
            .filter(|&o| o != e && g.conjugate(o) != e)
            .any(|o| g.edge_length(o) >= ttc.uniqueness_length);
        let plausible_alternative = g
            .outgoing(junction)
            .into_iter()
            .filter(|&o| o != e && g.conjugate(o) != e)
            .any(|o| g.edge_length(o) >= ttc.plausibility_length);
        if unique_backbone && plausible_alternative {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("topology tip clipping removed {removed} tips");
    Ok(removed > 0)
}

/// Two-step parallel tip clipping for presimplification: phase 1 marks tips
/// per vertex chunk without touching the graph, phase 2 applies the marks
/// sequentially, then compression runs chunk-parallel.
pub fn parallel_clip_tips(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    tip_condition: &str,
    info: &SimplifInfo,
) -> Result<bool> {
    info!("parallel tip clipping, chunk count = {}", info.chunk_cnt);
    let condition =
        Condition::parse(tip_condition).map_err(|e| anyhow!("tip condition: {e}"))?;
    let max_length = condition.max_length_bound().unwrap_or(usize::MAX);

    let vertices = g.smart_vertices();
    if vertices.is_empty() {
        return Ok(false);
    }
    let chunk_size = vertices.len().div_ceil(info.chunk_cnt.max(1));
    let frozen: &AssemblyGraph = &*g;
    let marks: Vec<EdgeId> = vertices
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| {
            let mut local = Vec::new();
            for &v in chunk {
                for e in frozen.outgoing(v).into_iter().chain(frozen.incoming(v)) {
                    if frozen.edge_length(e) <= max_length
                        && is_tip(frozen, e)
                        && condition.eval(frozen, cov, e)
                    {
                        local.push(e);
                    }
                }
            }
            local
        })
        .collect();

    let mut removed = 0usize;
    for e in marks {
        if g.contains_edge(e) && is_tip(g, e) {
            g.delete_edge(e);
            removed += 1;
        }
    }
    ParallelCompressor::new(info.chunk_cnt.max(1)).compress_all(g);
    Cleaner::new().clean(g);
    debug!("parallel tip clipping removed {removed} tips");
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seq(len: usize, phase: usize) -> Vec<u8> {
        (0..len)
            .map(|i| match (i + phase) % 4 {
                0 => b'A',
                1 => b'C',
                2 => b'T',
                _ => b'G',
            })
            .collect()
    }

    /// chain a -> b -> c -> d with a weak tip hanging off b
    fn graph_with_tip(
        tip_len: usize,
        tip_cov: f64,
    ) -> (AssemblyGraph, Arc<CoverageIndex>, EdgeId) {
        let mut g = AssemblyGraph::new(4);
        let cov = Arc::new(CoverageIndex::new());
        g.add_handler(cov.clone());
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        let (c, _) = g.add_vertex_pair();
        let (d, _) = g.add_vertex_pair();
        let (t, _) = g.add_vertex_pair();
        let e1 = g.add_edge(a, b, seq(30, 0));
        let e2 = g.add_edge(b, c, seq(30, 1));
        let e3 = g.add_edge(c, d, seq(30, 2));
        let tip = g.add_edge(b, t, seq(tip_len + 4, 3));
        cov.set_avg_coverage(&g, e1, 20.0);
        cov.set_avg_coverage(&g, e2, 20.0);
        cov.set_avg_coverage(&g, e3, 20.0);
        cov.set_avg_coverage(&g, tip, tip_cov);
        (g, cov, tip)
    }

    fn info() -> SimplifInfo {
        SimplifInfo {
            read_length: 100,
            detected_mean_coverage: 20.0,
            detected_coverage_bound: 10.0,
            chunk_cnt: 4,
            iteration_count: 1,
            iteration: 0,
        }
    }

    #[test]
    fn weak_short_tip_is_clipped_and_neighbourhood_compressed() {
        let (mut g, cov, tip) = graph_with_tip(30, 2.0);
        let tc = TipClipperConfig {
            condition: "tip && length < 50 && coverage < 5".to_string(),
        };
        let changed = clip_tips(&mut g, &cov, &tc, &info()).unwrap();
        assert!(changed);
        assert!(!g.contains_edge(tip));
        // b became compressible and the chain collapsed into one edge pair;
        // the orphaned tip vertex was cleaned
        assert_eq!(g.edge_count(), 2);
        for v in g.vertices() {
            assert!(!g.is_compressible(v));
        }
    }

    #[test]
    fn zero_length_bound_removes_nothing() {
        let (mut g, cov, tip) = graph_with_tip(30, 2.0);
        let tc = TipClipperConfig {
            condition: "tip && length < 0 && coverage < 5".to_string(),
        };
        let changed = clip_tips(&mut g, &cov, &tc, &info()).unwrap();
        assert!(!changed);
        assert!(g.contains_edge(tip));
    }

    #[test]
    fn strong_tip_survives_coverage_gate() {
        let (mut g, cov, tip) = graph_with_tip(30, 50.0);
        let tc = TipClipperConfig {
            condition: "tip && length < 50 && coverage < 5".to_string(),
        };
        let changed = clip_tips(&mut g, &cov, &tc, &info()).unwrap();
        assert!(!changed);
        assert!(g.contains_edge(tip));
    }

    #[test]
    fn parallel_clipping_agrees_with_serial() {
        let (mut g1, cov1, tip1) = graph_with_tip(30, 2.0);
        let (mut g2, cov2, tip2) = graph_with_tip(30, 2.0);
        let cond = "tip && length < 50 && coverage < 5";
        clip_tips(
            &mut g1,
            &cov1,
            &TipClipperConfig {
                condition: cond.to_string(),
            },
            &info(),
        )
        .unwrap();
        parallel_clip_tips(&mut g2, &cov2, cond, &info()).unwrap();
        assert!(!g1.contains_edge(tip1));
        assert!(!g2.contains_edge(tip2));
        assert_eq!(g1.edge_count(), g2.edge_count());
    }
}
