//! Peak detection over paired-read distance histograms.
//!
//! Raw pair observations are divided into clusters wherever consecutive
//! distances gap too far apart; each cluster's weight histogram is smoothed
//! by keeping only the lowest Fourier harmonics (an in-process DFT low-pass,
//! the histograms are tiny), and candidate distances that sit on local
//! maxima of the smoothed signal are accepted.

use super::PairInfo;

/// Gap (in bases) separating two observation clusters.
const CLUSTER_GAP: f64 = 8.0;

/// Splits distance-sorted pair observations into cluster boundaries:
/// returns indices `b_0 = 0 < b_1 < ... < b_m = n` such that each
/// `[b_i, b_{i+1})` is one cluster.
pub fn divide_data(data: &[PairInfo]) -> Vec<usize> {
    let mut bounds = vec![0];
    for i in 1..data.len() {
        if data[i].distance - data[i - 1].distance > CLUSTER_GAP {
            bounds.push(i);
        }
    }
    bounds.push(data.len());
    bounds
}

/// Weight histogram over one cluster's integer distance range.
pub struct PeakFinder {
    min_distance: i64,
    weights: Vec<f64>,
}

impl PeakFinder {
    /// Builds the histogram over `data[begin..end]` (distance-sorted).
    pub fn new(data: &[PairInfo], begin: usize, end: usize) -> Self {
        let slice = &data[begin..end];
        let min_distance = slice
            .first()
            .map(|p| p.distance.floor() as i64)
            .unwrap_or(0);
        let max_distance = slice
            .last()
            .map(|p| p.distance.ceil() as i64)
            .unwrap_or(0);
        let span = (max_distance - min_distance + 1).max(1) as usize;
        let mut weights = vec![0f64; span];
        for p in slice {
            let bin = (p.distance.round() as i64 - min_distance) as usize;
            weights[bin.min(span - 1)] += p.weight;
        }
        Self {
            min_distance,
            weights,
        }
    }

    /// Low-pass smoothing: keep the `cutoff` lowest DFT harmonics.
    pub fn fft_smoothing(&mut self, cutoff: usize) {
        let n = self.weights.len();
        if n <= 2 {
            return;
        }
        // forward DFT (histograms are a handful of bins, O(n^2) is fine)
        let mut re = vec![0f64; n];
        let mut im = vec![0f64; n];
        for k in 0..n {
            for (t, &w) in self.weights.iter().enumerate() {
                let angle = -2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                re[k] += w * angle.cos();
                im[k] += w * angle.sin();
            }
        }
        // zero everything above the cutoff (and the mirrored tail)
        for k in 0..n {
            let harmonic = k.min(n - k);
            if harmonic >= cutoff {
                re[k] = 0.0;
                im[k] = 0.0;
            }
        }
        // inverse DFT
        let mut smoothed = vec![0f64; n];
        for (t, slot) in smoothed.iter_mut().enumerate() {
            let mut acc = 0f64;
            for k in 0..n {
                let angle = 2.0 * std::f64::consts::PI * (k * t) as f64 / n as f64;
                acc += re[k] * angle.cos() - im[k] * angle.sin();
            }
            *slot = acc / n as f64;
        }
        self.weights = smoothed;
    }

    /// Smoothed weight at an integer distance.
    pub fn weight_at(&self, distance: i64) -> f64 {
        let idx = distance - self.min_distance;
        if idx < 0 || idx as usize >= self.weights.len() {
            return 0.0;
        }
        self.weights[idx as usize]
    }

    /// A distance is a peak when its smoothed weight is positive and not
    /// dominated by either neighbour.
    pub fn is_peak(&self, distance: i64) -> bool {
        let here = self.weight_at(distance);
        here > 0.0
            && here >= self.weight_at(distance - 1)
            && here >= self.weight_at(distance + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeId;

    fn pair(distance: f64, weight: f64) -> PairInfo {
        PairInfo {
            first: fake_edge(),
            second: fake_edge(),
            distance,
            weight,
            variance: 0.0,
        }
    }

    fn fake_edge() -> EdgeId {
        // ids only matter for identity inside the index, not the finder
        let mut g = crate::graph::AssemblyGraph::new(4);
        let (a, _) = g.add_vertex_pair();
        let (b, _) = g.add_vertex_pair();
        g.add_edge(a, b, b"ACGTTACGT".to_vec())
    }

    #[test]
    fn divide_splits_on_gaps() {
        let data = vec![
            pair(100.0, 1.0),
            pair(102.0, 1.0),
            pair(103.0, 1.0),
            pair(250.0, 1.0),
            pair(252.0, 1.0),
        ];
        let bounds = divide_data(&data);
        assert_eq!(bounds, vec![0, 3, 5]);
    }

    #[test]
    fn single_mode_histogram_peaks_at_mode() {
        let mut data: Vec<PairInfo> = Vec::new();
        for (d, w) in [(99.0, 1.0), (100.0, 5.0), (101.0, 1.0)] {
            data.push(pair(d, w));
        }
        let mut finder = PeakFinder::new(&data, 0, 3);
        finder.fft_smoothing(3);
        assert!(finder.is_peak(100));
    }

    #[test]
    fn flat_tail_is_not_a_peak() {
        let data = vec![pair(100.0, 4.0), pair(101.0, 4.0), pair(110.0, 0.5)];
        let finder = PeakFinder::new(&data, 0, 3);
        // unsmoothed: 110 has weight 0.5, neighbours 0 -> technically a local
        // max; 105 is an empty bin and must not be a peak
        assert!(!finder.is_peak(105));
    }
}
