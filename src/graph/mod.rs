//! Directed de Bruijn multigraph with a reverse-complement involution.
//!
//! Vertices and edges carry opaque stable identifiers (never reused, so a
//! stale id can always be detected). Every edge has a conjugate edge on the
//! opposite strand; the two are created, mutated and removed together, and
//! all structural mutations notify the registered [`GraphHandler`]s in
//! registration order before identifiers are invalidated.
//!
//! Iteration during mutation uses snapshot cursors ("smart" iteration):
//! callers take an id snapshot and check liveness per element, which the
//! never-reused serial ids make exact.

pub mod compressor;
pub mod coverage;
pub mod handlers;

use ahash::AHashMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::sync::Arc;

use crate::core::kmer::reverse_complement;

pub use compressor::{Cleaner, Compressor, ParallelCompressor};
pub use coverage::CoverageIndex;
pub use handlers::{CountingHandler, GraphHandler};

/// Stable vertex identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(u64);

/// Stable edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(u64);

impl EdgeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

struct VertexData {
    id: VertexId,
    rc: VertexId,
}

struct EdgeData {
    id: EdgeId,
    rc: EdgeId,
    seq: Vec<u8>,
}

pub struct AssemblyGraph {
    k: usize,
    g: StableDiGraph<VertexData, EdgeData>,
    vmap: AHashMap<VertexId, NodeIndex>,
    emap: AHashMap<EdgeId, EdgeIndex>,
    next_v: u64,
    next_e: u64,
    handlers: Vec<Arc<dyn GraphHandler>>,
}

impl AssemblyGraph {
    /// A graph of order `k`: every edge carries a nucleotide sequence of
    /// length at least `k + 1`.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            g: StableDiGraph::new(),
            vmap: AHashMap::new(),
            emap: AHashMap::new(),
            next_v: 0,
            next_e: 0,
            handlers: Vec::new(),
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /* ------------------------- handler registry ------------------------ */

    pub fn add_handler(&mut self, handler: Arc<dyn GraphHandler>) {
        self.handlers.push(handler);
    }

    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    pub fn all_handlers_thread_safe(&self) -> bool {
        self.handlers.iter().all(|h| h.thread_safe())
    }

    fn fire(&self, f: impl Fn(&dyn GraphHandler)) {
        for h in &self.handlers {
            f(h.as_ref());
        }
    }

    /* --------------------------- vertex ops ---------------------------- */

    fn new_vertex_id(&mut self) -> VertexId {
        let id = VertexId(self.next_v);
        self.next_v += 1;
        id
    }

    /// Adds a conjugate vertex pair and returns `(v, rc(v))`.
    pub fn add_vertex_pair(&mut self) -> (VertexId, VertexId) {
        let a = self.new_vertex_id();
        let b = self.new_vertex_id();
        let na = self.g.add_node(VertexData { id: a, rc: b });
        let nb = self.g.add_node(VertexData { id: b, rc: a });
        self.vmap.insert(a, na);
        self.vmap.insert(b, nb);
        (a, b)
    }

    /// Adds a vertex that is its own conjugate (a strand-crossing junction).
    pub fn add_self_conjugate_vertex(&mut self) -> VertexId {
        let v = self.new_vertex_id();
        let n = self.g.add_node(VertexData { id: v, rc: v });
        self.vmap.insert(v, n);
        v
    }

    pub fn conjugate_vertex(&self, v: VertexId) -> VertexId {
        self.g[self.node(v)].rc
    }

    pub fn contains_vertex(&self, v: VertexId) -> bool {
        self.vmap.contains_key(&v)
    }

    /// Removes an isolated vertex together with its conjugate.
    pub fn delete_vertex(&mut self, v: VertexId) {
        let rc = self.conjugate_vertex(v);
        assert_eq!(
            self.degree(v),
            0,
            "delete_vertex requires an isolated vertex"
        );
        let n = self.node(v);
        self.g.remove_node(n);
        self.vmap.remove(&v);
        if rc != v {
            assert_eq!(self.degree(rc), 0, "conjugate vertex not isolated");
            let n = self.node(rc);
            self.g.remove_node(n);
            self.vmap.remove(&rc);
        }
    }

    fn node(&self, v: VertexId) -> NodeIndex {
        *self
            .vmap
            .get(&v)
            .unwrap_or_else(|| panic!("stale vertex id {v:?}"))
    }

    pub fn vertices(&self) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self.g.node_weights().map(|d| d.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn vertex_count(&self) -> usize {
        self.g.node_count()
    }

    /* ---------------------------- edge ops ------------------------------ */

    fn new_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_e);
        self.next_e += 1;
        id
    }

    /// Adds an edge and its conjugate. When the sequence is its own reverse
    /// complement and the endpoints are mutually conjugate the edge is
    /// self-conjugate. Fires `on_add` per created edge.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId, seq: Vec<u8>) -> EdgeId {
        assert!(
            seq.len() > self.k,
            "edge sequence must be longer than the graph order"
        );
        let length = seq.len() - self.k;
        let rc_seq = reverse_complement(&seq);
        let self_conjugate =
            rc_seq == seq && from == self.conjugate_vertex(to) && to == self.conjugate_vertex(from);

        let e = self.new_edge_id();
        if self_conjugate {
            let ix = self.g.add_edge(
                self.node(from),
                self.node(to),
                EdgeData { id: e, rc: e, seq },
            );
            self.emap.insert(e, ix);
            self.fire(|h| h.on_add(e, length));
        } else {
            let re = self.new_edge_id();
            let ix = self.g.add_edge(
                self.node(from),
                self.node(to),
                EdgeData {
                    id: e,
                    rc: re,
                    seq,
                },
            );
            self.emap.insert(e, ix);
            let rc_from = self.conjugate_vertex(to);
            let rc_to = self.conjugate_vertex(from);
            let rix = self.g.add_edge(
                self.node(rc_from),
                self.node(rc_to),
                EdgeData {
                    id: re,
                    rc: e,
                    seq: rc_seq,
                },
            );
            self.emap.insert(re, rix);
            self.fire(|h| h.on_add(e, length));
            self.fire(|h| h.on_add(re, length));
        }
        e
    }

    fn edge_ix(&self, e: EdgeId) -> EdgeIndex {
        *self
            .emap
            .get(&e)
            .unwrap_or_else(|| panic!("stale edge id {e:?}"))
    }

    pub fn contains_edge(&self, e: EdgeId) -> bool {
        self.emap.contains_key(&e)
    }

    pub fn conjugate(&self, e: EdgeId) -> EdgeId {
        self.g[self.edge_ix(e)].rc
    }

    pub fn is_self_conjugate(&self, e: EdgeId) -> bool {
        self.conjugate(e) == e
    }

    pub fn edge_seq(&self, e: EdgeId) -> &[u8] {
        &self.g[self.edge_ix(e)].seq
    }

    /// Edge length in `k+1`-mers (sequence length minus `k`).
    pub fn edge_length(&self, e: EdgeId) -> usize {
        self.edge_seq(e).len() - self.k
    }

    pub fn edge_start(&self, e: EdgeId) -> VertexId {
        let (s, _) = self.g.edge_endpoints(self.edge_ix(e)).expect("live edge");
        self.g[s].id
    }

    pub fn edge_end(&self, e: EdgeId) -> VertexId {
        let (_, t) = self.g.edge_endpoints(self.edge_ix(e)).expect("live edge");
        self.g[t].id
    }

    pub fn edges(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self.g.edge_weights().map(|d| d.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn edge_count(&self) -> usize {
        self.g.edge_count()
    }

    pub fn outgoing(&self, v: VertexId) -> Vec<EdgeId> {
        self.g
            .edges_directed(self.node(v), Direction::Outgoing)
            .map(|r| r.weight().id)
            .collect()
    }

    pub fn incoming(&self, v: VertexId) -> Vec<EdgeId> {
        self.g
            .edges_directed(self.node(v), Direction::Incoming)
            .map(|r| r.weight().id)
            .collect()
    }

    pub fn out_degree(&self, v: VertexId) -> usize {
        self.g
            .edges_directed(self.node(v), Direction::Outgoing)
            .count()
    }

    pub fn in_degree(&self, v: VertexId) -> usize {
        self.g
            .edges_directed(self.node(v), Direction::Incoming)
            .count()
    }

    pub fn degree(&self, v: VertexId) -> usize {
        self.in_degree(v) + self.out_degree(v)
    }

    /// Removes the edge without touching its conjugate. `on_delete` fires
    /// before the id is invalidated.
    fn delete_one_edge(&mut self, e: EdgeId) {
        self.fire(|h| h.on_delete(e));
        let ix = self.edge_ix(e);
        self.g.remove_edge(ix);
        self.emap.remove(&e);
    }

    /// Removes an edge together with its conjugate.
    pub fn delete_edge(&mut self, e: EdgeId) {
        let rc = self.conjugate(e);
        self.delete_one_edge(e);
        if rc != e {
            self.delete_one_edge(rc);
        }
    }

    /* ------------------------ composite mutations ----------------------- */

    /// Concatenates a chain of edges (consecutive edges share a vertex, the
    /// sequences overlap by `k`) into a single edge, mirrored on the
    /// conjugate strand. Fires `on_add` for the new edges, `on_merge` for
    /// both strands, then `on_delete` for every removed edge. Interior
    /// vertices are deleted.
    pub fn merge_path(&mut self, path: &[EdgeId]) -> EdgeId {
        assert!(path.len() >= 2, "merge_path needs at least two edges");
        for w in path.windows(2) {
            assert_eq!(
                self.edge_end(w[0]),
                self.edge_start(w[1]),
                "merge_path edges are not a chain"
            );
        }
        let rc_path: Vec<EdgeId> = path.iter().rev().map(|&e| self.conjugate(e)).collect();
        for e in path {
            assert!(
                !rc_path.contains(e),
                "merge_path cannot cross a self-conjugate chain"
            );
        }

        let mut seq = self.edge_seq(path[0]).to_vec();
        for &e in &path[1..] {
            seq.extend_from_slice(&self.edge_seq(e)[self.k..]);
        }
        let start = self.edge_start(path[0]);
        let end = self.edge_end(path[path.len() - 1]);
        let interior: Vec<VertexId> = path[..path.len() - 1]
            .iter()
            .map(|&e| self.edge_end(e))
            .filter(|&v| v != start && v != end)
            .collect();

        let new = self.add_edge(start, end, seq);
        let new_rc = self.conjugate(new);
        let new_len = self.edge_length(new);
        self.fire(|h| h.on_merge(path, new, new_len));
        if new_rc != new {
            self.fire(|h| h.on_merge(&rc_path, new_rc, new_len));
        }
        for &e in path {
            self.delete_edge(e);
        }
        for v in interior {
            if self.contains_vertex(v) && self.degree(v) == 0 {
                self.delete_vertex(v);
            }
        }
        new
    }

    /// Cuts an edge at `offset` (in `1..length`) into two edges joined by a
    /// fresh vertex pair, mirrored on the conjugate strand. Fires `on_add`,
    /// `on_split` for both strands, then `on_delete` for the old edges.
    pub fn split_edge(&mut self, e: EdgeId, offset: usize) -> (EdgeId, EdgeId) {
        let length = self.edge_length(e);
        assert!(
            offset > 0 && offset < length,
            "split offset out of range"
        );
        assert!(
            !self.is_self_conjugate(e),
            "cannot split a self-conjugate edge"
        );
        let old_rc = self.conjugate(e);
        let start = self.edge_start(e);
        let end = self.edge_end(e);
        let seq = self.edge_seq(e).to_vec();

        let (mid, _) = self.add_vertex_pair();
        let n1 = self.add_edge(start, mid, seq[..offset + self.k].to_vec());
        let n2 = self.add_edge(mid, end, seq[offset..].to_vec());
        let (l1, l2) = (self.edge_length(n1), self.edge_length(n2));
        self.fire(|h| h.on_split(e, length, n1, l1, n2, l2));
        let (r1, r2) = (self.conjugate(n2), self.conjugate(n1));
        self.fire(|h| h.on_split(old_rc, length, r1, l2, r2, l1));
        self.delete_edge(e);
        (n1, n2)
    }

    /// Glues two parallel edges (same endpoints) into one edge carrying
    /// `target`'s sequence. Fires `on_add`, `on_glue` for both strands, then
    /// `on_delete` for the old edges. Returns the glued edge.
    pub fn glue(&mut self, victim: EdgeId, target: EdgeId) -> EdgeId {
        assert_eq!(self.edge_start(victim), self.edge_start(target));
        assert_eq!(self.edge_end(victim), self.edge_end(target));
        assert_ne!(victim, target);
        let start = self.edge_start(target);
        let end = self.edge_end(target);
        let seq = self.edge_seq(target).to_vec();
        let victim_rc = self.conjugate(victim);
        let target_rc = self.conjugate(target);

        let new = self.add_edge(start, end, seq);
        let new_rc = self.conjugate(new);
        self.fire(|h| h.on_glue(new, victim, target));
        if new_rc != new {
            self.fire(|h| h.on_glue(new_rc, victim_rc, target_rc));
        }
        self.delete_edge(victim);
        self.delete_edge(target);
        new
    }

    /// Splits a vertex: the listed outgoing edges are duplicated onto a new
    /// vertex pair, with `coeffs[i]` of the flow routed to the copy. The old
    /// edges are kept; `on_vertex_split` fires once with the old/new pairs.
    pub fn split_vertex(
        &mut self,
        v: VertexId,
        moved: &[EdgeId],
        coeffs: &[f64],
    ) -> VertexId {
        assert_eq!(moved.len(), coeffs.len());
        let (v2, _) = self.add_vertex_pair();
        let mut pairs = Vec::with_capacity(moved.len());
        for &e in moved {
            assert_eq!(self.edge_start(e), v, "moved edge does not leave v");
            let end = self.edge_end(e);
            let seq = self.edge_seq(e).to_vec();
            let copy = self.add_edge(v2, end, seq);
            pairs.push((e, copy));
        }
        self.fire(|h| h.on_vertex_split(v2, &pairs, coeffs, v));
        v2
    }

    /* --------------------------- queries -------------------------------- */

    /// A vertex is compressible when it has exactly one incoming and one
    /// outgoing edge which are distinct and not each other's conjugates.
    pub fn is_compressible(&self, v: VertexId) -> bool {
        if self.in_degree(v) != 1 || self.out_degree(v) != 1 {
            return false;
        }
        let e_in = self.incoming(v)[0];
        let e_out = self.outgoing(v)[0];
        e_in != e_out && self.conjugate(e_in) != e_out
    }

    /// Deletion-tolerant edge snapshot: iterate the returned ids and skip
    /// those for which [`contains_edge`](Self::contains_edge) is false.
    pub fn smart_edges(&self) -> Vec<EdgeId> {
        self.edges()
    }

    /// Edge snapshot ordered by ascending value of `key` (typically coverage).
    pub fn smart_edges_by<F: FnMut(EdgeId) -> f64>(&self, mut key: F) -> Vec<EdgeId> {
        let mut ids = self.edges();
        ids.sort_by(|&a, &b| {
            key(a)
                .partial_cmp(&key(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ids
    }

    /// Deletion-tolerant vertex snapshot.
    pub fn smart_vertices(&self) -> Vec<VertexId> {
        self.vertices()
    }
}
