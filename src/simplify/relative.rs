//! Relative-coverage component removal.
//!
//! A connected subgraph of weak edges whose every boundary vertex is
//! dominated by strong outside edges (flanking coverage at least
//! `coverage_gap` times the strongest inside edge) is a sequencing artifact
//! and is removed whole, bounded by a vertex count limit and length bounds.

use ahash::AHashSet;
use anyhow::Result;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::graph::{AssemblyGraph, Cleaner, Compressor, CoverageIndex, EdgeId, VertexId};
use crate::utils::configuration::RelativeCoverageConfig;

use super::conditions::{is_tip, LengthThresholdFinder};
use super::SimplifInfo;

/// Local (flanking) coverage of an edge near a vertex. With whole-edge
/// coverage bookkeeping this is the edge's average coverage; a dedicated
/// flanking index can refine it without touching the algorithm.
pub fn local_coverage(g: &AssemblyGraph, cov: &CoverageIndex, e: EdgeId, _v: VertexId) -> f64 {
    cov.coverage(g, e)
}

struct Component {
    vertices: AHashSet<VertexId>,
    edges: Vec<EdgeId>,
    max_inner_cov: f64,
}

/// Grows the weak component containing `seed`: edges with coverage below
/// `cov_bound` are inside, stronger edges bound it. Returns `None` when the
/// component exceeds `vertex_limit` or contains an overlong inner edge.
fn grow_component(
    g: &AssemblyGraph,
    cov: &CoverageIndex,
    seed: EdgeId,
    cov_bound: f64,
    vertex_limit: usize,
    length_bound: usize,
    tip_length_bound: usize,
) -> Option<Component> {
    let mut vertices: AHashSet<VertexId> = AHashSet::new();
    let mut edges: AHashSet<EdgeId> = AHashSet::new();
    let mut max_inner_cov = 0f64;
    let mut queue: VecDeque<EdgeId> = VecDeque::new();
    queue.push_back(seed);

    while let Some(e) = queue.pop_front() {
        if !edges.insert(e) {
            continue;
        }
        edges.insert(g.conjugate(e));
        let len = g.edge_length(e);
        let allowed = if is_tip(g, e) {
            tip_length_bound
        } else {
            length_bound
        };
        if len > allowed {
            return None;
        }
        max_inner_cov = max_inner_cov.max(cov.coverage(g, e));
        for v in [g.edge_start(e), g.edge_end(e)] {
            if !vertices.insert(v) {
                continue;
            }
            if vertices.len() > vertex_limit {
                return None;
            }
            for o in g.incoming(v).into_iter().chain(g.outgoing(v)) {
                if edges.contains(&o) {
                    continue;
                }
                if cov.coverage(g, o) < cov_bound {
                    queue.push_back(o);
                }
            }
        }
    }
    let forward: Vec<EdgeId> = edges
        .iter()
        .copied()
        .filter(|&e| {
            let rc = g.conjugate(e);
            e <= rc
        })
        .collect();
    Some(Component {
        vertices,
        edges: forward,
        max_inner_cov,
    })
}

/// Every boundary vertex (inside vertex touching outside edges) must be
/// flanked by outside edges at least `coverage_gap` above the strongest
/// inner edge.
fn boundary_dominated(
    g: &AssemblyGraph,
    cov: &CoverageIndex,
    component: &Component,
    inner: &AHashSet<EdgeId>,
    coverage_gap: f64,
) -> bool {
    let mut boundary_edges = 0usize;
    for &v in &component.vertices {
        for o in g.incoming(v).into_iter().chain(g.outgoing(v)) {
            if inner.contains(&o) || inner.contains(&g.conjugate(o)) {
                continue;
            }
            boundary_edges += 1;
            if local_coverage(g, cov, o, v) < coverage_gap * component.max_inner_cov {
                return false;
            }
        }
    }
    // a component that swallowed its whole neighbourhood is not bounded by
    // strong edges and must not be removed
    boundary_edges > 0
}

/// Removes relatively low covered components. Returns whether anything was
/// removed.
pub fn remove_relative_coverage_components(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    rcc: &RelativeCoverageConfig,
    info: &SimplifInfo,
) -> Result<bool> {
    if !rcc.enabled {
        info!("removal of relatively low covered connections disabled");
        return Ok(false);
    }
    info!("removing relatively low covered connections");
    let length_bound = (info.read_length as f64 * rcc.length_coeff) as usize;
    let tip_length_bound = (info.read_length as f64 * rcc.tip_allowing_length_coeff) as usize;
    let connecting_bound = LengthThresholdFinder::max_erroneous_connection_length(
        g.k(),
        rcc.max_ec_length_coefficient,
    );
    let max_seed_cov = info.detected_coverage_bound * rcc.max_coverage_coeff;

    let mut removed_any = false;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) {
            continue;
        }
        let ecov = cov.coverage(g, e);
        if ecov > max_seed_cov {
            break;
        }
        if g.edge_length(e) > connecting_bound.max(length_bound) {
            continue;
        }
        let Some(component) = grow_component(
            g,
            cov,
            e,
            rcc.coverage_gap * ecov.max(f64::MIN_POSITIVE),
            rcc.vertex_count_limit,
            length_bound,
            tip_length_bound,
        ) else {
            continue;
        };
        let inner: AHashSet<EdgeId> = component.edges.iter().copied().collect();
        if !boundary_dominated(g, cov, &component, &inner, rcc.coverage_gap) {
            continue;
        }
        debug!(
            "removing component of {} edges around {e:?}",
            component.edges.len()
        );
        for doomed in &component.edges {
            if g.contains_edge(*doomed) {
                g.delete_edge(*doomed);
            }
        }
        removed_any = true;
    }
    if removed_any {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(removed_any)
}
