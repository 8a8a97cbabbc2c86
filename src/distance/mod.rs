//! Paired-read distance estimation over the assembly graph.
//!
//! The [`PairedInfoIndex`] buckets raw `(edge1, edge2, distance, weight,
//! variance)` observations per edge pair. The advanced estimator reconciles
//! each bucket against the distances actually realizable as graph paths:
//! observations are clustered, each cluster is smoothed by the peak finder,
//! graph distances confirmed as peaks are kept and finally merged into
//! weighted records within the linkage distance.

pub mod peak_finder;

use ahash::AHashMap;
use std::collections::VecDeque;
use tracing::info;

use crate::graph::{AssemblyGraph, EdgeId};

pub use peak_finder::{divide_data, PeakFinder};

/// One paired-read distance observation (or estimated record).
#[derive(Debug, Clone, PartialEq)]
pub struct PairInfo {
    pub first: EdgeId,
    pub second: EdgeId,
    pub distance: f64,
    pub weight: f64,
    pub variance: f64,
}

/// Buckets of pair observations keyed by edge pair, distance-sorted.
#[derive(Debug, Default)]
pub struct PairedInfoIndex {
    buckets: AHashMap<(EdgeId, EdgeId), Vec<PairInfo>>,
}

impl PairedInfoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pair_info(&mut self, info: PairInfo) {
        let bucket = self.buckets.entry((info.first, info.second)).or_default();
        let at = bucket
            .partition_point(|p| p.distance <= info.distance);
        bucket.insert(at, info);
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&(EdgeId, EdgeId), &Vec<PairInfo>)> {
        self.buckets.iter()
    }

    pub fn get(&self, first: EdgeId, second: EdgeId) -> Option<&Vec<PairInfo>> {
        self.buckets.get(&(first, second))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Smoothing cutoff: lowest DFT harmonics kept per cluster.
const CUTOFF: usize = 3;
/// Minimal number of observations for a cluster to be considered.
const MINIMAL_PEAK_POINTS: usize = 2;
/// Weight attached to a confirmed peak distance.
const PEAK_WEIGHT: f64 = 10_000.0;

pub struct AdvancedDistanceEstimator<'a> {
    graph: &'a AssemblyGraph,
    insert_size: usize,
    read_length: usize,
    delta: usize,
    linkage_distance: usize,
}

impl<'a> AdvancedDistanceEstimator<'a> {
    pub fn new(
        graph: &'a AssemblyGraph,
        insert_size: usize,
        read_length: usize,
        delta: usize,
        linkage_distance: usize,
    ) -> Self {
        info!("advanced distance estimator started");
        Self {
            graph,
            insert_size,
            read_length,
            delta,
            linkage_distance,
        }
    }

    /// Candidate distances between two edges realizable as graph paths:
    /// path lengths from `end(first)` to `start(second)` plus
    /// `length(first)`, bounded by the insert size window.
    fn graph_distances(&self, first: EdgeId, second: EdgeId) -> Vec<usize> {
        let g = self.graph;
        let upper = self.insert_size + self.delta;
        let from = g.edge_end(first);
        let target = g.edge_start(second);

        let mut found: Vec<usize> = Vec::new();
        // bounded BFS accumulating path lengths (not just shortest)
        let mut queue: VecDeque<(crate::graph::VertexId, usize)> = VecDeque::new();
        queue.push_back((from, 0));
        let mut expansions = 0usize;
        while let Some((v, dist)) = queue.pop_front() {
            if v == target {
                found.push(dist);
            }
            expansions += 1;
            if expansions > 10_000 {
                break;
            }
            for e in g.outgoing(v) {
                let nd = dist + g.edge_length(e);
                if nd <= upper {
                    queue.push_back((g.edge_end(e), nd));
                }
            }
        }
        // paths shorter than the insert window minus both reads are not
        // realizable by a proper pair
        let lower = self
            .insert_size
            .saturating_sub(2 * self.read_length + 2 * self.delta);
        let mut result: Vec<usize> = found
            .into_iter()
            .map(|d| d + g.edge_length(first))
            .filter(|&d| d >= lower)
            .collect();
        if first == second {
            result.push(0);
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Accepts the graph distances confirmed as peaks of the smoothed
    /// observation clusters.
    fn estimate_edge_pair_distances(
        &self,
        data: &[PairInfo],
        forward: &[usize],
    ) -> Vec<(usize, f64)> {
        let mut result = Vec::new();
        if data.len() <= 1 || forward.is_empty() {
            return result;
        }
        let bounds = divide_data(data);
        let mut cursor = 0usize;
        for w in bounds.windows(2) {
            let (begin, end) = (w[0], w[1]);
            if end - begin <= MINIMAL_PEAK_POINTS {
                continue;
            }
            while cursor < forward.len() && (forward[cursor] as f64) < data[begin].distance {
                cursor += 1;
            }
            let mut finder = PeakFinder::new(data, begin, end);
            finder.fft_smoothing(CUTOFF);
            while cursor < forward.len() && forward[cursor] as f64 <= data[end - 1].distance {
                if finder.is_peak(forward[cursor] as i64) {
                    result.push((forward[cursor], PEAK_WEIGHT));
                }
                cursor += 1;
            }
        }
        result
    }

    /// Merges accepted peaks within the linkage distance into weighted
    /// `(center, weight, variance)` records.
    fn cluster_result(
        &self,
        first: EdgeId,
        second: EdgeId,
        estimated: &[(usize, f64)],
    ) -> Vec<PairInfo> {
        let mut result = Vec::new();
        let mut i = 0usize;
        while i < estimated.len() {
            let left = i;
            let mut weight = estimated[i].1;
            while i + 1 < estimated.len()
                && estimated[i + 1].0 - estimated[i].0 <= self.linkage_distance
            {
                i += 1;
                weight += estimated[i].1;
            }
            let center = (estimated[left].0 + estimated[i].0) as f64 * 0.5;
            let variance = (estimated[i].0 - estimated[left].0) as f64 * 0.5;
            result.push(PairInfo {
                first,
                second,
                distance: center,
                weight,
                variance,
            });
            i += 1;
        }
        result
    }

    /// Estimates refined distances for every bucket of the histogram.
    pub fn estimate(&self, histogram: &PairedInfoIndex) -> PairedInfoIndex {
        let mut result = PairedInfoIndex::new();
        for (&(first, second), data) in histogram.pairs() {
            let forward = self.graph_distances(first, second);
            let estimated = self.estimate_edge_pair_distances(data, &forward);
            for info in self.cluster_result(first, second, &estimated) {
                result.add_pair_info(info);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CoverageIndex;
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

    /// chain a --e1(100)--> b --e2(50)--> c
    fn chain() -> (AssemblyGraph, EdgeId, EdgeId) {
        let mut g = AssemblyGraph::new(4);
        let cov = Arc::new(CoverageIndex::new());
        g.add_handler(cov);
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        let (c, _) = g.add_vertex_pair();
        let e1 = g.add_edge(a, b, seq(104, 0));
        let e2 = g.add_edge(b, c, seq(54, 1));
        (g, e1, e2)
    }

    #[test]
    fn graph_distance_matches_chain_layout() {
        let (g, e1, e2) = chain();
        let est = AdvancedDistanceEstimator::new(&g, 300, 100, 10, 3);
        let distances = est.graph_distances(e1, e2);
        // end(e1) == start(e2): distance is exactly length(e1) = 100
        assert_eq!(distances, vec![100]);
    }

    #[test]
    fn estimator_confirms_observed_peak() {
        let (g, e1, e2) = chain();
        let mut histogram = PairedInfoIndex::new();
        for (d, w) in [(99.0, 2.0), (100.0, 6.0), (101.0, 2.0), (102.0, 1.0)] {
            histogram.add_pair_info(PairInfo {
                first: e1,
                second: e2,
                distance: d,
                weight: w,
                variance: 0.0,
            });
        }
        let est = AdvancedDistanceEstimator::new(&g, 300, 100, 10, 3);
        let refined = est.estimate(&histogram);
        let bucket = refined.get(e1, e2).expect("refined bucket");
        assert_eq!(bucket.len(), 1);
        assert!((bucket[0].distance - 100.0).abs() < 1e-9);
        assert!(bucket[0].weight >= 10_000.0);
    }

    #[test]
    fn unobserved_pair_yields_nothing() {
        let (g, e1, e2) = chain();
        let mut histogram = PairedInfoIndex::new();
        // a single observation is below the minimal peak point count
        histogram.add_pair_info(PairInfo {
            first: e1,
            second: e2,
            distance: 100.0,
            weight: 1.0,
            variance: 0.0,
        });
        let est = AdvancedDistanceEstimator::new(&g, 300, 100, 10, 3);
        let refined = est.estimate(&histogram);
        assert!(refined.is_empty());
    }
}
