//! Coverage bookkeeping as a graph action handler.
//!
//! Stores the integer `k+1`-mer count per edge; average coverage of an edge
//! is its stored count divided by its length. The handler keeps counts
//! consistent across merges, glues, splits and vertex splits, and every
//! stored value stays non-negative.

use ahash::AHashMap;
use parking_lot::RwLock;

use super::handlers::GraphHandler;
use super::{AssemblyGraph, EdgeId, VertexId};

#[derive(Default)]
pub struct CoverageIndex {
    storage: RwLock<AHashMap<EdgeId, i64>>,
}

impl CoverageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored `k+1`-mer count for the edge (0 when absent).
    pub fn count(&self, e: EdgeId) -> i64 {
        self.storage.read().get(&e).copied().unwrap_or(0)
    }

    pub fn set_count(&self, e: EdgeId, count: i64) {
        assert!(count >= 0, "negative coverage for {e:?}");
        self.storage.write().insert(e, count);
    }

    pub fn inc_count(&self, e: EdgeId, delta: i64) {
        let mut storage = self.storage.write();
        let entry = storage.entry(e).or_insert(0);
        *entry += delta;
        assert!(*entry >= 0, "negative coverage for {e:?}");
    }

    /// Average coverage: stored count over edge length.
    pub fn coverage(&self, g: &AssemblyGraph, e: EdgeId) -> f64 {
        self.count(e) as f64 / g.edge_length(e) as f64
    }

    /// Convenience for building test graphs: sets the count so that the
    /// average coverage equals `cov`.
    pub fn set_avg_coverage(&self, g: &AssemblyGraph, e: EdgeId, cov: f64) {
        let count = (cov * g.edge_length(e) as f64).round() as i64;
        self.set_count(e, count.max(0));
        // mirror on the conjugate strand
        let rc = g.conjugate(e);
        if rc != e {
            self.set_count(rc, count.max(0));
        }
    }
}

impl GraphHandler for CoverageIndex {
    fn thread_safe(&self) -> bool {
        true
    }

    fn on_delete(&self, e: EdgeId) {
        self.storage.write().remove(&e);
    }

    fn on_merge(&self, old: &[EdgeId], new: EdgeId, _new_length: usize) {
        let total: i64 = {
            let storage = self.storage.read();
            old.iter()
                .map(|e| storage.get(e).copied().unwrap_or(0))
                .sum()
        };
        self.set_count(new, total);
    }

    fn on_glue(&self, new: EdgeId, e1: EdgeId, e2: EdgeId) {
        let add = self.count(e1) + self.count(e2);
        self.inc_count(new, add);
    }

    fn on_split(
        &self,
        old: EdgeId,
        old_length: usize,
        n1: EdgeId,
        n1_length: usize,
        n2: EdgeId,
        n2_length: usize,
    ) {
        let avg = self.count(old) as f64 / old_length as f64;
        self.set_count(n1, ((avg * n1_length as f64).round() as i64).max(1));
        self.set_count(n2, ((avg * n2_length as f64).round() as i64).max(1));
    }

    fn on_vertex_split(
        &self,
        _new_v: VertexId,
        pairs: &[(EdgeId, EdgeId)],
        coeffs: &[f64],
        _old_v: VertexId,
    ) {
        for ((old, new), coeff) in pairs.iter().zip(coeffs.iter()) {
            let share = (self.count(*old) as f64 * coeff).floor() as i64;
            self.inc_count(*new, share);
        }
    }
}
