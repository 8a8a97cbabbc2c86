//! Erroneous connection removers: low-coverage (iterative threshold),
//! topology-based, topology+reliability, multiplicity counting, interstrand
//! thorns, max-flow, hidden ECs, isolated edges and self-conjugate edges.

use ahash::{AHashMap, AHashSet};
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::graph::{
    AssemblyGraph, Cleaner, Compressor, CoverageIndex, EdgeId, ParallelCompressor, VertexId,
};
use crate::utils::configuration::{
    EcRemoverConfig, HiddenEcConfig, InterstrandEcConfig, IsolatedEdgeConfig, MaxFlowEcConfig,
    TopologyEcConfig, TopologyReliabilityEcConfig,
};

use super::conditions::{Condition, LengthThresholdFinder};
use super::SimplifInfo;

/// Number of threshold steps for the iterative low-coverage remover.
const EC_THRESHOLD_STEPS: usize = 10;

/// Iterative low-coverage EC removal: the coverage threshold rises in steps
/// to the parsed bound, removing condition-accepted edges at each step so
/// that compression between steps can rescue borderline paths.
pub fn remove_low_coverage_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    ec: &EcRemoverConfig,
    _info: &SimplifInfo,
) -> Result<bool> {
    info!("removing low covered connections");
    let condition =
        Condition::parse(&ec.condition).map_err(|e| anyhow!("ec condition: {e}"))?;
    let max_coverage = condition.max_coverage_bound().unwrap_or(f64::MAX);

    let mut removed = 0usize;
    for step in 1..=EC_THRESHOLD_STEPS {
        let threshold = max_coverage * step as f64 / EC_THRESHOLD_STEPS as f64;
        let mut step_removed = 0usize;
        for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
            if !g.contains_edge(e) {
                continue;
            }
            if cov.coverage(g, e) > threshold {
                break;
            }
            if condition.eval(g, cov, e) {
                g.delete_edge(e);
                step_removed += 1;
            }
        }
        if step_removed > 0 {
            Compressor::new().compress_all(g);
        }
        removed += step_removed;
    }
    if removed > 0 {
        Cleaner::new().clean(g);
    }
    debug!("low coverage EC removal: {removed} edges removed");
    Ok(removed > 0)
}

/// Two-step parallel low-coverage EC removal for presimplification: chunks
/// of the edge snapshot mark candidates read-only, marks are applied under
/// exclusive access, then compression runs chunk-parallel.
pub fn parallel_remove_low_coverage_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    ec_condition: &str,
    info: &SimplifInfo,
) -> Result<bool> {
    info!("parallel ec remover, chunk count = {}", info.chunk_cnt);
    let condition =
        Condition::parse(ec_condition).map_err(|e| anyhow!("ec condition: {e}"))?;

    let edges = g.smart_edges();
    if edges.is_empty() {
        return Ok(false);
    }
    let chunk_size = edges.len().div_ceil(info.chunk_cnt.max(1));
    let frozen: &AssemblyGraph = &*g;
    let marks: Vec<EdgeId> = edges
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| {
            chunk
                .iter()
                .copied()
                .filter(|&e| condition.eval(frozen, cov, e))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut removed = 0usize;
    for e in marks {
        if g.contains_edge(e) {
            g.delete_edge(e);
            removed += 1;
        }
    }
    ParallelCompressor::new(info.chunk_cnt.max(1)).compress_all(g);
    Cleaner::new().clean(g);
    debug!("parallel EC removal: {removed} edges removed");
    Ok(removed > 0)
}

/// Removes short, barely covered self-conjugate edges. Fires only the
/// removal observers (no projection).
pub fn remove_self_conjugate_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    max_length: usize,
    max_coverage: f64,
) -> Result<bool> {
    info!("removing short low covered self-conjugate connections");
    let mut removed = 0usize;
    for e in g.smart_edges() {
        if !g.contains_edge(e) || !g.is_self_conjugate(e) {
            continue;
        }
        if g.edge_length(e) <= max_length && cov.coverage(g, e) <= max_coverage {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(removed > 0)
}

/// An edge is isolated when neither endpoint touches any other edge
/// (conjugates aside).
fn is_isolated(g: &AssemblyGraph, e: EdgeId) -> bool {
    let start = g.edge_start(e);
    let end = g.edge_end(e);
    let extra = |v: VertexId| {
        g.incoming(v)
            .into_iter()
            .chain(g.outgoing(v))
            .any(|o| o != e && g.conjugate(o) != e)
    };
    !extra(start) && !extra(end)
}

/// Removes isolated edges: unconditionally up to
/// `max(read_length, ier.max_length_any_cov)`, and additionally up to
/// `ier.max_length` when coverage is at most `ier.max_coverage`.
pub fn remove_isolated_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    ier: &IsolatedEdgeConfig,
    read_length: usize,
) -> Result<bool> {
    let max_length_any = read_length.max(ier.max_length_any_cov);
    info!(
        "removing isolated edges shorter than {max_length_any} (any coverage) or shorter than {} with coverage <= {}",
        ier.max_length, ier.max_coverage
    );
    let mut removed = 0usize;
    for e in g.smart_edges() {
        if !g.contains_edge(e) || !is_isolated(g, e) {
            continue;
        }
        let len = g.edge_length(e);
        let by_any = len <= max_length_any;
        let by_cov = len <= ier.max_length && cov.coverage(g, e) <= ier.max_coverage;
        if by_any || by_cov {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Cleaner::new().clean(g);
    }
    Ok(removed > 0)
}

/* ------------------------------------------------------------------ */
/*                     topology-based EC removal                      */
/* ------------------------------------------------------------------ */

fn unique_long_incoming(g: &AssemblyGraph, v: VertexId, uniqueness: usize) -> bool {
    let inc = g.incoming(v);
    inc.len() == 1 && g.edge_length(inc[0]) >= uniqueness
}

fn unique_long_outgoing(g: &AssemblyGraph, v: VertexId, uniqueness: usize) -> bool {
    let out = g.outgoing(v);
    out.len() == 1 && g.edge_length(out[0]) >= uniqueness
}

fn plausible_alternative_from(
    g: &AssemblyGraph,
    v: VertexId,
    skip: EdgeId,
    plausibility: usize,
) -> bool {
    g.outgoing(v)
        .into_iter()
        .any(|o| o != skip && g.conjugate(o) != skip && g.edge_length(o) >= plausibility)
}

fn plausible_alternative_into(
    g: &AssemblyGraph,
    v: VertexId,
    skip: EdgeId,
    plausibility: usize,
) -> bool {
    g.incoming(v)
        .into_iter()
        .any(|o| o != skip && g.conjugate(o) != skip && g.edge_length(o) >= plausibility)
}

/// Topology EC remover: a short edge flanked by unique long edges on both
/// sides, with plausible alternative continuations, is chimeric.
pub fn topology_remove_erroneous_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    tec: &TopologyEcConfig,
) -> Result<bool> {
    info!("removing connections based on topology");
    let max_length =
        LengthThresholdFinder::max_erroneous_connection_length(g.k(), tec.max_ec_length_coefficient);

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.edge_length(e) > max_length {
            continue;
        }
        let start = g.edge_start(e);
        let end = g.edge_end(e);
        let unique_sides = unique_long_incoming(g, start, tec.uniqueness_length)
            && unique_long_outgoing(g, end, tec.uniqueness_length);
        let plausible = plausible_alternative_from(g, start, e, tec.plausibility_length)
            || plausible_alternative_into(g, end, e, tec.plausibility_length);
        if unique_sides && plausible {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("topology EC removal: {removed} edges removed");
    Ok(removed > 0)
}

/// Topology + reliability: unique long edges on both sides and well-covered
/// surroundings make a short edge removable.
pub fn topology_reliability_remove_erroneous_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    trec: &TopologyReliabilityEcConfig,
) -> Result<bool> {
    info!("removing connections based on topology and reliable coverage");
    let max_length = LengthThresholdFinder::max_erroneous_connection_length(
        g.k(),
        trec.max_ec_length_coefficient,
    );

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.edge_length(e) > max_length {
            continue;
        }
        let start = g.edge_start(e);
        let end = g.edge_end(e);
        if !(unique_long_incoming(g, start, trec.uniqueness_length)
            && unique_long_outgoing(g, end, trec.uniqueness_length))
        {
            continue;
        }
        let surrounding: f64 = g
            .incoming(start)
            .into_iter()
            .chain(g.outgoing(end))
            .map(|o| cov.coverage(g, o))
            .fold(f64::INFINITY, f64::min);
        if surrounding >= trec.unreliable_coverage {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(removed > 0)
}

/// Multiplicity-counting EC remover: the unique flanks imply multiplicity
/// one through the junctions; a short edge in excess of that multiplicity
/// (a second parallel continuation on both sides) is chimeric.
pub fn multiplicity_counting_remove_erroneous_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    tec: &TopologyEcConfig,
) -> Result<bool> {
    info!("removing connections based on topological multiplicity counting");
    let max_length =
        LengthThresholdFinder::max_erroneous_connection_length(g.k(), tec.max_ec_length_coefficient);

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.edge_length(e) > max_length {
            continue;
        }
        let start = g.edge_start(e);
        let end = g.edge_end(e);
        let unique_sides = unique_long_incoming(g, start, tec.uniqueness_length)
            && unique_long_outgoing(g, end, tec.uniqueness_length);
        // flow through the junction is already saturated by plausible
        // alternatives on both sides
        let plausible_both = plausible_alternative_from(g, start, e, tec.plausibility_length)
            && plausible_alternative_into(g, end, e, tec.plausibility_length);
        if unique_sides && plausible_both {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(removed > 0)
}

/* ------------------------------------------------------------------ */
/*                        interstrand thorns                          */
/* ------------------------------------------------------------------ */

/// Shortest-path distance (in edge lengths) from `from` to `to`, bounded.
fn within_distance(
    g: &AssemblyGraph,
    from: VertexId,
    to: VertexId,
    bound: usize,
) -> bool {
    if from == to {
        return true;
    }
    let mut dist: AHashMap<VertexId, usize> = AHashMap::new();
    let mut queue: VecDeque<VertexId> = VecDeque::new();
    dist.insert(from, 0);
    queue.push_back(from);
    while let Some(v) = queue.pop_front() {
        let d = dist[&v];
        for e in g.outgoing(v) {
            let nd = d + g.edge_length(e);
            if nd > bound {
                continue;
            }
            let w = g.edge_end(e);
            if w == to {
                return true;
            }
            if dist.get(&w).map_or(true, |&old| nd < old) {
                dist.insert(w, nd);
                queue.push_back(w);
            }
        }
    }
    false
}

/// Thorn remover: a short edge flanked by a unique edge that connects a
/// strand to its own reverse complement within `span_distance` is an
/// interstrand artifact.
pub fn remove_thorns(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    isec: &InterstrandEcConfig,
) -> Result<bool> {
    info!("removing interstrand connections");
    let max_length =
        LengthThresholdFinder::max_erroneous_connection_length(g.k(), isec.max_ec_length_coefficient);

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.edge_length(e) > max_length {
            continue;
        }
        let start = g.edge_start(e);
        let end = g.edge_end(e);
        let flanked_unique = unique_long_incoming(g, start, isec.uniqueness_length)
            || unique_long_outgoing(g, end, isec.uniqueness_length);
        if !flanked_unique {
            continue;
        }
        // crossing to the conjugate strand: the far end reaches the
        // conjugate of the near side within the span
        let rc_start = g.conjugate_vertex(start);
        if within_distance(g, end, rc_start, isec.span_distance) {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("thorn removal: {removed} edges removed");
    Ok(removed > 0)
}

/* ------------------------------------------------------------------ */
/*                         max-flow EC removal                        */
/* ------------------------------------------------------------------ */

/// Local Edmonds-Karp max flow over unit edge capacities.
struct LocalFlowNet {
    /// adjacency: node -> (neighbor, edge slot)
    adj: Vec<Vec<(usize, usize)>>,
    /// residual capacity per directed slot
    cap: Vec<i32>,
}

impl LocalFlowNet {
    fn new(nodes: usize) -> Self {
        Self {
            adj: vec![Vec::new(); nodes],
            cap: Vec::new(),
        }
    }

    fn add_edge(&mut self, from: usize, to: usize, capacity: i32) -> usize {
        let slot = self.cap.len();
        self.adj[from].push((to, slot));
        self.cap.push(capacity);
        self.adj[to].push((from, slot + 1));
        self.cap.push(0);
        slot
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> i32 {
        let mut flow = 0;
        loop {
            // BFS for an augmenting path
            let mut parent: Vec<Option<(usize, usize)>> = vec![None; self.adj.len()];
            let mut queue = VecDeque::new();
            queue.push_back(source);
            while let Some(v) = queue.pop_front() {
                if v == sink {
                    break;
                }
                for &(w, slot) in &self.adj[v] {
                    if self.cap[slot] > 0 && parent[w].is_none() && w != source {
                        parent[w] = Some((v, slot));
                        queue.push_back(w);
                    }
                }
            }
            if parent[sink].is_none() {
                return flow;
            }
            // augment by 1 (unit capacities dominate)
            let mut bottleneck = i32::MAX;
            let mut v = sink;
            while let Some((prev, slot)) = parent[v] {
                bottleneck = bottleneck.min(self.cap[slot]);
                v = prev;
            }
            let mut v = sink;
            while let Some((prev, slot)) = parent[v] {
                self.cap[slot] -= bottleneck;
                self.cap[slot ^ 1] += bottleneck;
                v = prev;
            }
            flow += bottleneck;
        }
    }

    /// BFS reachability over positive-residual arcs.
    fn residual_reachable(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        let mut seen = vec![false; self.adj.len()];
        seen[from] = true;
        let mut queue = VecDeque::new();
        queue.push_back(from);
        while let Some(v) = queue.pop_front() {
            for &(w, slot) in &self.adj[v] {
                if self.cap[slot] > 0 && !seen[w] {
                    if w == to {
                        return true;
                    }
                    seen[w] = true;
                    queue.push_back(w);
                }
            }
        }
        false
    }
}

/// Collects the local subgraph between the unique flanks of `e`:
/// vertices reachable forward from `sources` without passing long edges.
fn local_component(
    g: &AssemblyGraph,
    seed: VertexId,
    uniqueness: usize,
    limit: usize,
) -> (Vec<VertexId>, Vec<EdgeId>) {
    let mut vertices: Vec<VertexId> = vec![seed];
    let mut seen: AHashSet<VertexId> = AHashSet::new();
    seen.insert(seed);
    let mut edges: AHashSet<EdgeId> = AHashSet::new();
    let mut queue: VecDeque<VertexId> = VecDeque::new();
    queue.push_back(seed);
    while let Some(v) = queue.pop_front() {
        if vertices.len() > limit {
            break;
        }
        for e in g.outgoing(v).into_iter().chain(g.incoming(v)) {
            if g.edge_length(e) >= uniqueness {
                continue; // unique edges bound the component
            }
            edges.insert(e);
            for w in [g.edge_start(e), g.edge_end(e)] {
                if seen.insert(w) {
                    vertices.push(w);
                    queue.push_back(w);
                }
            }
        }
    }
    (vertices, edges.into_iter().collect())
}

/// Max-flow EC remover: inside the component bounded by unique edges, an
/// edge that participates in no max flow from the incoming unique flanks to
/// the outgoing unique flanks is removed. After computing one max flow, an
/// unsaturated edge is in some max flow exactly when its head still reaches
/// its tail in the residual network.
pub fn max_flow_remove_erroneous_edges(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    mfec: &MaxFlowEcConfig,
) -> Result<bool> {
    if !mfec.enabled {
        return Ok(false);
    }
    info!("removing connections based on max flow strategy");
    let max_length =
        LengthThresholdFinder::max_erroneous_connection_length(g.k(), mfec.max_ec_length_coefficient);
    const COMPONENT_LIMIT: usize = 64;

    let mut removed = 0usize;
    for e in g.smart_edges_by(|e| cov.coverage(g, e)) {
        if !g.contains_edge(e) || g.edge_length(e) > max_length {
            continue;
        }
        let (vertices, edges) =
            local_component(g, g.edge_start(e), mfec.uniqueness_length, COMPONENT_LIMIT);
        if vertices.len() > COMPONENT_LIMIT || !edges.contains(&e) {
            continue;
        }
        let index: AHashMap<VertexId, usize> = vertices
            .iter()
            .enumerate()
            .map(|(i, &v)| (v, i))
            .collect();

        // sources: component vertices fed by a unique edge from outside;
        // sinks: component vertices draining into a unique edge
        let mut net = LocalFlowNet::new(vertices.len() + 2);
        let source = vertices.len();
        let sink = vertices.len() + 1;
        let mut has_source = false;
        let mut has_sink = false;
        for (&v, &i) in index.iter() {
            if g
                .incoming(v)
                .into_iter()
                .any(|o| g.edge_length(o) >= mfec.uniqueness_length)
            {
                net.add_edge(source, i, i32::MAX / 2);
                has_source = true;
            }
            if g
                .outgoing(v)
                .into_iter()
                .any(|o| g.edge_length(o) >= mfec.uniqueness_length)
            {
                net.add_edge(i, sink, i32::MAX / 2);
                has_sink = true;
            }
        }
        if !has_source || !has_sink {
            continue;
        }
        let mut slot_of_e = None;
        let mut ends_of_e = None;
        for &ce in &edges {
            let (Some(&a), Some(&b)) = (index.get(&g.edge_start(ce)), index.get(&g.edge_end(ce)))
            else {
                continue;
            };
            let slot = net.add_edge(a, b, 1);
            if ce == e {
                slot_of_e = Some(slot);
                ends_of_e = Some((a, b));
            }
        }
        let (Some(slot), Some((tail, head))) = (slot_of_e, ends_of_e) else {
            continue;
        };
        net.max_flow(source, sink);
        let saturated = net.cap[slot] == 0;
        // an unsaturated edge joins a max flow only via an augmenting cycle,
        // i.e. when head -> tail exists in the residual network
        if !saturated && !net.residual_reachable(head, tail) {
            g.delete_edge(e);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    debug!("max-flow EC removal: {removed} edges removed");
    Ok(removed > 0)
}

/* ------------------------------------------------------------------ */
/*                            hidden ECs                              */
/* ------------------------------------------------------------------ */

/// Hidden EC remover: at a vertex fed by a unique long edge and fanning into
/// exactly two short edges, the weaker branch is an EC masked by the
/// stronger one when its flanking coverage is unreliable in absolute terms
/// or relative to the sibling.
pub fn remove_hidden_ec(
    g: &mut AssemblyGraph,
    cov: &CoverageIndex,
    her: &HiddenEcConfig,
    detected_coverage_bound: f64,
) -> Result<bool> {
    if !her.enabled {
        return Ok(false);
    }
    info!("removing hidden erroneous connections");
    let mut removed = 0usize;
    for v in g.smart_vertices() {
        if !g.contains_vertex(v) {
            continue;
        }
        if g.out_degree(v) != 2 || !unique_long_incoming(g, v, her.uniqueness_length) {
            continue;
        }
        let out = g.outgoing(v);
        let (mut weak, mut strong) = (out[0], out[1]);
        if cov.coverage(g, weak) > cov.coverage(g, strong) {
            std::mem::swap(&mut weak, &mut strong);
        }
        if g.edge_length(weak) >= her.uniqueness_length
            || g.edge_length(strong) >= her.uniqueness_length
        {
            continue;
        }
        let weak_cov = cov.coverage(g, weak);
        let strong_cov = cov.coverage(g, strong);
        let unreliable = weak_cov <= her.unreliability_threshold * detected_coverage_bound;
        let dominated = weak_cov * her.relative_threshold < strong_cov;
        if unreliable && dominated {
            g.delete_edge(weak);
            removed += 1;
        }
    }
    if removed > 0 {
        Compressor::new().compress_all(g);
        Cleaner::new().clean(g);
    }
    Ok(removed > 0)
}
