//! Vertex compression: merging chains of degree-1/1 vertices into single
//! edges, serially or chunk-parallel, plus the isolated-vertex cleaner.
//!
//! The parallel compressor uses the two-step pattern: worker chunks only
//! *find* chains (phase 1, read-only, rayon), the merges are applied
//! sequentially (phase 2), and a final serial pass closes loops and chains
//! that straddled chunk boundaries.

use ahash::AHashSet;
use rayon::prelude::*;
use tracing::debug;

use super::{AssemblyGraph, EdgeId, VertexId};

/// Serial compressor. After [`compress_all`](Compressor::compress_all)
/// returns, no compressible vertex remains.
#[derive(Default)]
pub struct Compressor;

impl Compressor {
    pub fn new() -> Self {
        Self
    }

    /// Collects the maximal chain of edges through compressible vertices
    /// containing `v`. Returns `None` when `v` is not compressible or the
    /// chain would cross itself on the conjugate strand.
    fn chain_through(g: &AssemblyGraph, v: VertexId) -> Option<Vec<EdgeId>> {
        if !g.is_compressible(v) {
            return None;
        }
        let mut first = g.incoming(v)[0];
        let mut seen: AHashSet<VertexId> = AHashSet::new();
        seen.insert(v);
        // walk left to the chain head (or around a full cycle)
        loop {
            let u = g.edge_start(first);
            if !g.is_compressible(u) || !seen.insert(u) {
                break;
            }
            first = g.incoming(u)[0];
        }
        let mut chain = vec![first];
        let mut cursor = g.edge_end(first);
        while g.is_compressible(cursor) {
            let next = g.outgoing(cursor)[0];
            if next == chain[0] {
                break; // closed a loop
            }
            chain.push(next);
            cursor = g.edge_end(next);
        }
        if chain.len() < 2 {
            return None;
        }
        // refuse chains meeting their own conjugate strand
        for e in &chain {
            if chain.contains(&g.conjugate(*e)) {
                return None;
            }
        }
        Some(chain)
    }

    /// Compresses the chain containing `v`, if any. Returns whether a merge
    /// happened.
    pub fn compress_vertex(&self, g: &mut AssemblyGraph, v: VertexId) -> bool {
        match Self::chain_through(g, v) {
            Some(chain) => {
                g.merge_path(&chain);
                true
            }
            None => false,
        }
    }

    /// Compresses every chain in the graph. Returns the number of merges.
    pub fn compress_all(&self, g: &mut AssemblyGraph) -> usize {
        let mut merges = 0;
        for v in g.smart_vertices() {
            if g.contains_vertex(v) && self.compress_vertex(g, v) {
                merges += 1;
            }
        }
        merges
    }
}

/// Chunk-parallel compressor: phase 1 finds chains fully contained in a
/// vertex chunk, phase 2 applies them, and a final serial pass finishes.
pub struct ParallelCompressor {
    chunk_cnt: usize,
}

impl ParallelCompressor {
    pub fn new(chunk_cnt: usize) -> Self {
        Self {
            chunk_cnt: chunk_cnt.max(1),
        }
    }

    pub fn compress_all(&self, g: &mut AssemblyGraph) -> usize {
        let vertices = g.smart_vertices();
        if vertices.is_empty() {
            return 0;
        }
        let chunk_size = vertices.len().div_ceil(self.chunk_cnt);

        // phase 1: read-only chain discovery per chunk
        let frozen: &AssemblyGraph = &*g;
        let chains: Vec<Vec<EdgeId>> = vertices
            .par_chunks(chunk_size)
            .flat_map_iter(|chunk| {
                let members: AHashSet<VertexId> = chunk.iter().copied().collect();
                let mut found = Vec::new();
                let mut claimed: AHashSet<EdgeId> = AHashSet::new();
                for &v in chunk {
                    if let Some(chain) = Compressor::chain_through(frozen, v) {
                        // keep only chains whose interior vertices all lie in
                        // this chunk, so chunks never race for a chain
                        let interior_ok = chain
                            .windows(2)
                            .all(|w| members.contains(&frozen.edge_end(w[0]) ) && members.contains(&frozen.edge_start(w[1])));
                        if interior_ok && chain.iter().all(|e| claimed.insert(*e)) {
                            found.push(chain);
                        }
                    }
                }
                found
            })
            .collect();

        // phase 2: apply under exclusive access
        let mut merges = 0;
        for chain in chains {
            if chain.iter().all(|&e| g.contains_edge(e)) && Self::still_chain(g, &chain) {
                g.merge_path(&chain);
                merges += 1;
            }
        }

        // final serial pass closes loops and cross-chunk chains
        merges += Compressor::new().compress_all(g);
        debug!("parallel compression: {merges} chains merged");
        merges
    }

    fn still_chain(g: &AssemblyGraph, chain: &[EdgeId]) -> bool {
        chain
            .windows(2)
            .all(|w| g.edge_end(w[0]) == g.edge_start(w[1]) && g.is_compressible(g.edge_end(w[0])))
    }
}

/// Removes vertices with no incident edges (tip clipping and erroneous
/// connection removal leave these behind).
#[derive(Default)]
pub struct Cleaner;

impl Cleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, g: &mut AssemblyGraph) -> usize {
        let mut removed = 0;
        for v in g.smart_vertices() {
            if g.contains_vertex(v) && g.degree(v) == 0 {
                let rc = g.conjugate_vertex(v);
                if rc == v || g.degree(rc) == 0 {
                    g.delete_vertex(v);
                    removed += 1;
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CoverageIndex;
    use std::sync::Arc;

    fn filler(len: usize, phase: usize) -> Vec<u8> {
        (0..len)
            .map(|i| match (i + phase) % 4 {
                0 => b'A',
                1 => b'C',
                2 => b'T',
                _ => b'G',
            })
            .collect()
    }

    /// a -> b -> c -> d chain of three edges
    fn chain_graph() -> (AssemblyGraph, Vec<EdgeId>) {
        let mut g = AssemblyGraph::new(4);
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        let (c, _) = g.add_vertex_pair();
        let (d, _) = g.add_vertex_pair();
        let e1 = g.add_edge(a, b, filler(9, 0));
        let e2 = g.add_edge(b, c, filler(7, 1));
        let e3 = g.add_edge(c, d, filler(8, 2));
        (g, vec![e1, e2, e3])
    }

    #[test]
    fn serial_compression_collapses_chain() {
        let (mut g, edges) = chain_graph();
        let merges = Compressor::new().compress_all(&mut g);
        assert_eq!(merges, 1);
        assert_eq!(g.edge_count(), 2); // merged edge + its conjugate
        for e in edges {
            assert!(!g.contains_edge(e));
        }
        for v in g.vertices() {
            assert!(!g.is_compressible(v));
        }
    }

    #[test]
    fn compression_is_idempotent() {
        let (mut g, _) = chain_graph();
        Compressor::new().compress_all(&mut g);
        let before: Vec<EdgeId> = g.edges();
        let merges = Compressor::new().compress_all(&mut g);
        assert_eq!(merges, 0);
        assert_eq!(g.edges(), before);
    }

    #[test]
    fn parallel_compression_matches_serial() {
        let (mut g, _) = chain_graph();
        let merges = ParallelCompressor::new(4).compress_all(&mut g);
        assert!(merges >= 1);
        assert_eq!(g.edge_count(), 2);
        for v in g.vertices() {
            assert!(!g.is_compressible(v));
        }
    }

    #[test]
    fn compression_preserves_coverage_sum() {
        let (mut g, edges) = chain_graph();
        let cov = Arc::new(CoverageIndex::new());
        g.add_handler(cov.clone());
        cov.set_count(edges[0], 10);
        cov.set_count(edges[1], 20);
        cov.set_count(edges[2], 30);
        Compressor::new().compress_all(&mut g);
        let merged = g
            .edges()
            .into_iter()
            .find(|&e| cov.count(e) > 0)
            .expect("merged edge has coverage");
        assert_eq!(cov.count(merged), 60);
    }

    #[test]
    fn cleaner_removes_isolated_vertices() {
        let mut g = AssemblyGraph::new(4);
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        let e = g.add_edge(a, b, filler(9, 0));
        g.delete_edge(e);
        assert_eq!(g.vertex_count(), 4);
        let removed = Cleaner::new().clean(&mut g);
        assert!(removed >= 2);
        assert_eq!(g.vertex_count(), 0);
    }
}
