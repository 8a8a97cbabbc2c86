//! Bulge removal: simple bulges (an edge with a near-parallel alternative
//! path) and complex bulges (a bounded reconverging subgraph collapsed to a
//! single chain).

use anyhow::Result;
use tracing::{debug, info};

use crate::graph::{AssemblyGraph, Cleaner, Compressor, CoverageIndex, EdgeId, VertexId};
use crate::utils::configuration::{BulgeRemoverConfig, ComplexBulgeConfig};

use super::conditions::LengthThresholdFinder;

/// Projection callback: invoked with the removed bulge edge and the
/// alternative path it was projected onto, before the removal.
pub type ProjectionCallback<'a> = dyn FnMut(EdgeId, &[EdgeId]) + 'a;

/// Bounded search for an alternative path from `start` to `end` avoiding
/// `forbidden`, with total length within `[min_len, max_len]`. Depth-first
/// with a path-length budget; returns the first acceptable path.
fn find_alternative_path(
    g: &AssemblyGraph,
    start: VertexId,
    end: VertexId,
    forbidden: EdgeId,
    min_len: usize,
    max_len: usize,
) -> Option<Vec<EdgeId>> {
    struct Frame {
        vertex: VertexId,
        edges: Vec<EdgeId>,
        next: usize,
    }
    let mut stack = vec![Frame {
        vertex: start,
        edges: Vec::new(),
        next: 0,
    }];
    let mut path: Vec<EdgeId> = Vec::new();
    let mut length = 0usize;

    while let Some(frame) = stack.last_mut() {
        if frame.edges.is_empty() {
            frame.edges = g.outgoing(frame.vertex);
        }
        if frame.next >= frame.edges.len() {
            stack.pop();
            if let Some(e) = path.pop() {
                length -= g.edge_length(e);
            }
            continue;
        }
        let e = frame.edges[frame.next];
        frame.next += 1;
        if e == forbidden || g.conjugate(e) == forbidden {
            continue;
        }
        let elen = g.edge_length(e);
        if length + elen > max_len {
            continue;
        }
        let target = g.edge_end(e);
        if target == end && length + elen >= min_len {
            path.push(e);
            return Some(path);
        }
        if target == end || target == start {
            continue; // only simple detours
        }
        if path.contains(&e) {
            continue;
        }
        // bounded depth keeps the search local
        if stack.len() > 24 {
            continue;
        }
        path.push(e);
        length += elen;
        stack.push(Frame {
            vertex: target,
            edges: Vec::new(),
            next: 0,
        });
    }
    None
}

/// Minimum average coverage along a path.
fn path_coverage(g: &AssemblyGraph, cov: &CoverageIndex, path: &[EdgeId]) -> f64 {
    path.iter()
        .map(|&e| cov.coverage(g, e))
        .fold(f64::INFINITY, f64::min)
}

/// Removes simple bulges. An edge is a bulge when an alternative path with
/// close length exists and either the edge's coverage is below
/// `max_coverage` or the path's coverage dominates it by
/// `max_relative_coverage`. The projection callback fires before removal;
/// a single parallel alternative is glued, longer alternatives just absorb
/// the removal.
pub fn remove_bulges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    br: &BulgeRemoverConfig,
    mut projection: Option<&mut ProjectionCallback<'_>>,
    additional_length_bound: Option<usize>,
) -> Result<bool> {
    if !br.enabled {
        return Ok(false);
    }
    info!("removing bulges");
    let mut max_length = LengthThresholdFinder::max_bulge_length(
        g.k(),
        br.max_bulge_length_coefficient,
        br.max_additive_length_coefficient,
    );
    if let Some(bound) = additional_length_bound {
        max_length = max_length.min(bound);
    }

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.is_self_conjugate(e) {
            continue;
        }
        let elen = g.edge_length(e);
        if elen > max_length {
            continue;
        }
        let delta = br.max_delta + (br.max_relative_delta * elen as f64).round() as usize;
        let start = g.edge_start(e);
        let end = g.edge_end(e);
        if start == end {
            continue;
        }
        let Some(alt) = find_alternative_path(
            g,
            start,
            end,
            e,
            elen.saturating_sub(delta),
            elen + delta,
        ) else {
            continue;
        };
        let ecov = cov.coverage(g, e);
        let dominated = path_coverage(g, cov, &alt) >= br.max_relative_coverage * ecov;
        if !(ecov <= br.max_coverage || dominated) {
            continue;
        }
        if let Some(cb) = projection.as_deref_mut() {
            cb(e, &alt);
        }
        if alt.len() == 1 {
            g.glue(e, alt[0]);
        } else {
            g.delete_edge(e);
        }
        removed += 1;
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("bulge removal: {removed} bulges removed");
    Ok(removed > 0)
}

/// Collapses complex bulges: a subgraph of bounded total length whose paths
/// from a branching vertex reconverge on a single vertex with bounded length
/// spread. The strongest-coverage path is kept, every other internal edge is
/// removed.
pub fn remove_complex_bulges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    cbr: &ComplexBulgeConfig,
) -> Result<bool> {
    if !cbr.enabled {
        return Ok(false);
    }
    info!("removing complex bulges");
    let max_length = (g.k() as f64 * cbr.max_relative_length) as usize;

    let mut changed = false;
    for v in g.smart_vertices() {
        if !g.contains_vertex(v) || g.out_degree(v) < 2 {
            continue;
        }
        if let Some((sink, paths)) = reconverging_paths(g, v, max_length) {
            let spread = match (
                paths.iter().map(|p| p.1).max(),
                paths.iter().map(|p| p.1).min(),
            ) {
                (Some(longest), Some(shortest)) => longest - shortest,
                _ => continue,
            };
            if paths.len() < 2 || spread > cbr.max_length_difference {
                continue;
            }
            // keep the best-covered path, drop every edge not on it
            let best = paths
                .iter()
                .max_by(|a, b| {
                    path_coverage(g, cov, &a.0)
                        .partial_cmp(&path_coverage(g, cov, &b.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("non-empty path set")
                .0
                .clone();
            let mut doomed: Vec<EdgeId> = Vec::new();
            for (path, _) in &paths {
                for &e in path {
                    if !best.contains(&e) && !doomed.contains(&e) {
                        doomed.push(e);
                    }
                }
            }
            if doomed.is_empty() {
                continue;
            }
            for e in doomed {
                if g.contains_edge(e) {
                    g.delete_edge(e);
                    changed = true;
                }
            }
            let _ = sink;
        }
    }
    if changed {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(changed)
}

/// Enumerates all simple paths from `v` up to `max_length` and checks they
/// reconverge on one common sink. Returns the sink and the per-path edge
/// lists with lengths. Gives up on subgraphs fanning out too widely.
fn reconverging_paths(
    g: &AssemblyGraph,
    v: VertexId,
    max_length: usize,
) -> Option<(VertexId, Vec<(Vec<EdgeId>, usize)>)> {
    const MAX_PATHS: usize = 32;
    let mut complete: Vec<(Vec<EdgeId>, usize, VertexId)> = Vec::new();
    let mut queue: Vec<(Vec<EdgeId>, usize, VertexId)> = vec![(Vec::new(), 0, v)];

    while let Some((path, length, cursor)) = queue.pop() {
        if complete.len() + queue.len() > MAX_PATHS {
            return None;
        }
        let out = g.outgoing(cursor);
        if out.is_empty() {
            return None; // dead end inside the candidate subgraph
        }
        for e in out {
            let elen = g.edge_length(e);
            if length + elen > max_length {
                if path.is_empty() {
                    return None; // first edge already too long
                }
                // terminate this branch at its current vertex
                complete.push((path.clone(), length, cursor));
                continue;
            }
            let target = g.edge_end(e);
            let mut next = path.clone();
            next.push(e);
            if g.in_degree(target) > 1 || g.out_degree(target) == 0 {
                complete.push((next, length + elen, target));
            } else {
                queue.push((next, length + elen, target));
            }
        }
    }

    let sink = complete.first()?.2;
    if sink == v || !complete.iter().all(|c| c.2 == sink) {
        return None;
    }
    Some((
        sink,
        complete.into_iter().map(|(p, l, _)| (p, l)).collect(),
    ))
}
