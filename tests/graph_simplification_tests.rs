//! Graph simplification scenarios: bulge gluing with observer delivery,
//! tip clipping with cleanup, the silent fixpoint on canonical graphs, and
//! the structural invariants every pass must preserve.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use seq_forge::graph::{
    AssemblyGraph, Cleaner, Compressor, CountingHandler, CoverageIndex, EdgeId, GraphHandler,
};
use seq_forge::simplify::{clip_tips, remove_bulges, SimplifInfo, Simplifier};
use seq_forge::utils::configuration::{SimplificationConfig, TipClipperConfig};

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

fn info() -> SimplifInfo {
    SimplifInfo {
        read_length: 100,
        detected_mean_coverage: 50.0,
        detected_coverage_bound: 10.0,
        chunk_cnt: 4,
        iteration_count: 2,
        iteration: 0,
    }
}

/// Records deleted edge ids in order.
#[derive(Default)]
struct DeletionLog {
    deleted: Mutex<Vec<EdgeId>>,
}

impl GraphHandler for DeletionLog {
    fn thread_safe(&self) -> bool {
        true
    }
    fn on_delete(&self, e: EdgeId) {
        self.deleted.lock().unwrap().push(e);
    }
}

/// Counts every structural event.
#[derive(Default)]
struct EventCounter {
    events: AtomicUsize,
}

impl GraphHandler for EventCounter {
    fn thread_safe(&self) -> bool {
        true
    }
    fn on_add(&self, _e: EdgeId, _l: usize) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
    fn on_delete(&self, _e: EdgeId) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
    fn on_merge(&self, _old: &[EdgeId], _new: EdgeId, _l: usize) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
    fn on_glue(&self, _new: EdgeId, _e1: EdgeId, _e2: EdgeId) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Parallel low-coverage edge beside a strong twin, with a continuation
/// chain: the weak edge is glued away, its deletion reaches the observers,
/// and compression merges the remaining chain.
#[test]
fn bulge_removal_glues_and_compresses() {
    let mut g = AssemblyGraph::new(4);
    let cov = Arc::new(CoverageIndex::new());
    let log = Arc::new(DeletionLog::default());
    g.add_handler(cov.clone());
    g.add_handler(log.clone());

    let (a, _) = g.add_vertex_pair();
    let (b, _) = g.add_vertex_pair();
    let (c, _) = g.add_vertex_pair();
    let strong = g.add_edge(a, b, seq(24, 0));
    let weak = g.add_edge(a, b, seq(24, 1));
    let tail = g.add_edge(b, c, seq(24, 2));
    cov.set_avg_coverage(&g, strong, 100.0);
    cov.set_avg_coverage(&g, weak, 3.0);
    cov.set_avg_coverage(&g, tail, 100.0);

    let br = seq_forge::utils::configuration::BulgeRemoverConfig {
        enabled: true,
        max_bulge_length_coefficient: 10.0,
        max_additive_length_coefficient: 10,
        max_coverage: 0.0,
        max_relative_coverage: 10.0,
        max_delta: 3,
        max_relative_delta: 0.1,
    };
    let changed = remove_bulges(&mut g, &cov, &br, None, None).unwrap();
    assert!(changed);
    assert!(!g.contains_edge(weak));
    assert!(log.deleted.lock().unwrap().contains(&weak));

    // the junction vertex compressed away: one merged edge pair remains
    assert_eq!(g.edge_count(), 2);
    for v in g.vertices() {
        assert!(!g.is_compressible(v));
    }
    // glue + merge preserved the k+1-mer mass of the surviving strand
    let merged = g.edges().into_iter().max_by_key(|&e| cov.count(e)).unwrap();
    assert_eq!(cov.count(merged), 20 * 100 + 20 * 3 + 20 * 100);
}

/// A short weak tip hangs off a covered backbone: clipping removes it and
/// the isolated vertex is cleaned away.
#[test]
fn tip_clipping_removes_tip_and_cleans_vertex() {
    let mut g = AssemblyGraph::new(4);
    let cov = Arc::new(CoverageIndex::new());
    g.add_handler(cov.clone());
    let (w, _) = g.add_vertex_pair();
    let (x, _) = g.add_vertex_pair();
    let (y, _) = g.add_vertex_pair();
    let (z, _) = g.add_vertex_pair();
    let b1 = g.add_edge(w, x, seq(60, 0));
    let b2 = g.add_edge(x, z, seq(60, 1));
    let tip = g.add_edge(x, y, seq(34, 2)); // length 30
    cov.set_avg_coverage(&g, b1, 20.0);
    cov.set_avg_coverage(&g, b2, 20.0);
    cov.set_avg_coverage(&g, tip, 2.0);

    let tc = TipClipperConfig {
        condition: "tip && length < 50 && coverage < 5".to_string(),
    };
    let vertex_count_before = g.vertex_count();
    let changed = clip_tips(&mut g, &cov, &tc, &info()).unwrap();
    assert!(changed);
    assert!(!g.contains_edge(tip));
    // tip vertex pair cleaned, junction compressed away
    assert!(g.vertex_count() < vertex_count_before);
    for v in g.vertices() {
        assert!(!g.is_compressible(v));
        assert!(g.degree(v) > 0);
    }
}

/// Post-simplification on a graph already in canonical form reports no
/// change and never notifies an observer.
#[test]
fn canonical_graph_fixpoint_is_silent() {
    let mut g = AssemblyGraph::new(4);
    let cov = Arc::new(CoverageIndex::new());
    g.add_handler(cov.clone());
    let (a, _) = g.add_vertex_pair();
    let (b, _) = g.add_vertex_pair();
    let e = g.add_edge(a, b, seq(500, 0));
    cov.set_avg_coverage(&g, e, 50.0);

    let counter = Arc::new(EventCounter::default());
    g.add_handler(counter.clone());

    let cfg = SimplificationConfig::default();
    let counting = CountingHandler::new();
    Simplifier::new(&cfg, info())
        .post_simplification(&mut g, &cov, &counting)
        .unwrap();

    assert_eq!(counter.events.load(Ordering::Relaxed), 0);
    assert_eq!(g.edge_count(), 2);
}

/// Structural invariants after a full simplification run: the conjugate
/// involution holds, stored coverage stays non-negative, and no
/// compressible vertex survives.
#[test]
fn full_simplification_preserves_invariants() {
    let mut g = AssemblyGraph::new(4);
    let cov = Arc::new(CoverageIndex::new());
    g.add_handler(cov.clone());

    // messy graph: backbone, bulge, tip, weak bridge
    let (a, _) = g.add_vertex_pair();
    let (b, _) = g.add_vertex_pair();
    let (c, _) = g.add_vertex_pair();
    let (d, _) = g.add_vertex_pair();
    let (t, _) = g.add_vertex_pair();
    let e1 = g.add_edge(a, b, seq(60, 0));
    let e2 = g.add_edge(b, c, seq(60, 1));
    let bulge = g.add_edge(b, c, seq(62, 2));
    let e3 = g.add_edge(c, d, seq(60, 3));
    let tip = g.add_edge(c, t, seq(20, 0));
    for (e, cvg) in [(e1, 40.0), (e2, 40.0), (bulge, 2.0), (e3, 40.0), (tip, 1.0)] {
        cov.set_avg_coverage(&g, e, cvg);
    }

    let mut cfg = SimplificationConfig::default();
    cfg.presimp.enabled = false;
    cfg.tc.condition = "tip && length < 50 && coverage < 5".to_string();
    cfg.ec.condition = "length < 10 && coverage < 1".to_string();
    cfg.iteration_count = 2;
    Simplifier::new(&cfg, info()).simplify(&mut g, &cov).unwrap();

    for e in g.edges() {
        assert_eq!(g.conjugate(g.conjugate(e)), e);
        assert!(cov.count(e) >= 0);
    }
    for v in g.vertices() {
        assert!(!g.is_compressible(v));
    }
    assert!(!g.contains_edge(tip));
    assert!(!g.contains_edge(bulge));
}

/// Compressing an already compressed graph is the identity.
#[test]
fn compression_is_idempotent_at_scale() {
    let mut g = AssemblyGraph::new(4);
    let cov = Arc::new(CoverageIndex::new());
    g.add_handler(cov.clone());
    // long chain of 8 edges
    let mut vertices = Vec::new();
    for _ in 0..9 {
        vertices.push(g.add_vertex_pair().0);
    }
    for i in 0..8 {
        let e = g.add_edge(vertices[i], vertices[i + 1], seq(12 + i, i));
        cov.set_avg_coverage(&g, e, 10.0);
    }
    Compressor::new().compress_all(&mut g);
    let edges_once = g.edges();
    let merges = Compressor::new().compress_all(&mut g);
    assert_eq!(merges, 0);
    assert_eq!(g.edges(), edges_once);
    Cleaner::new().clean(&mut g);
    assert_eq!(g.edge_count(), 2);
}
