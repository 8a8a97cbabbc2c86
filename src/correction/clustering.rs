//! Hamming-neighborhood clustering of the k-mer table.
//!
//! Union-find over k-mer indices: every run of equal slices in the sorted
//! sub-k-mer files is scanned pairwise, and pairs within Hamming distance
//! `tau` are united. Each cluster elects a center by Bayesian likelihood
//! (count-weighted, quality-tie-broken); non-center members point at the
//! center through `change_to`, and solid flags are assigned from the
//! count/quality thresholds.

use std::path::PathBuf;

use ahash::AHashMap;
use anyhow::Result;
use petgraph::unionfind::UnionFind;
use tracing::{debug, info};

use crate::core::blob::Blob;
use crate::core::kmer::{hamming, KmerStat, FLAG_GOOD, FLAG_GOOD_ITER};
use crate::utils::configuration::BayesConfig;

use super::merger::KmerTable;
use super::subkmer::for_each_slice_run;
use super::HammerContext;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterStats {
    pub clusters: usize,
    pub singletons: usize,
    pub solid: usize,
    pub rewired: usize,
}

pub struct HammingClusterer<'a> {
    ctx: &'a HammerContext,
}

impl<'a> HammingClusterer<'a> {
    pub fn new(ctx: &'a HammerContext) -> Self {
        Self { ctx }
    }

    /// Clusters the table in place and assigns `change_to` pointers and
    /// solid flags.
    pub fn cluster(
        &self,
        blob: &Blob,
        table: &mut KmerTable,
        sorted_slice_files: &[PathBuf],
    ) -> Result<ClusterStats> {
        let tau = self.ctx.cfg.general.tau;
        let gzip = self.ctx.cfg.general.gzip;
        let n = table.len();
        if n == 0 {
            return Ok(ClusterStats::default());
        }
        info!("clustering {n} k-mers at Hamming radius {tau}");

        let mut uf: UnionFind<usize> = UnionFind::new(n);
        for path in sorted_slice_files {
            for_each_slice_run(path, gzip, |run| {
                for (i, &a) in run.iter().enumerate() {
                    for &b in &run[i + 1..] {
                        if uf.find(a) == uf.find(b) {
                            continue;
                        }
                        let dist = hamming(
                            blob.kmer_bytes(table.kmernos[a]),
                            blob.kmer_bytes(table.kmernos[b]),
                        );
                        if dist <= tau {
                            uf.union(a, b);
                        }
                    }
                }
            })?;
        }

        let labels = uf.into_labeling();
        let mut clusters: AHashMap<usize, Vec<usize>> = AHashMap::new();
        for (i, root) in labels.into_iter().enumerate() {
            clusters.entry(root).or_default().push(i);
        }

        let bayes = &self.ctx.cfg.bayes;
        let mut stats = ClusterStats {
            clusters: clusters.len(),
            ..Default::default()
        };
        for members in clusters.values() {
            self.assign_cluster(table, members, bayes, &mut stats);
        }
        debug!(
            "clustering done: {} clusters ({} singletons), {} solid, {} rewired",
            stats.clusters, stats.singletons, stats.solid, stats.rewired
        );
        Ok(stats)
    }

    /// Bayesian center score: occurrences weighted by aggregate quality.
    /// Higher is better.
    fn center_score(stat: &KmerStat) -> f64 {
        stat.count as f64 * (1.0 - stat.total_error_prob).max(f64::MIN_POSITIVE)
    }

    fn passes_thresholds(stat: &KmerStat, bayes: &BayesConfig) -> bool {
        stat.count >= bayes.count_threshold || stat.total_error_prob <= bayes.quality_threshold
    }

    fn assign_cluster(
        &self,
        table: &mut KmerTable,
        members: &[usize],
        bayes: &BayesConfig,
        stats: &mut ClusterStats,
    ) {
        if members.len() == 1 {
            stats.singletons += 1;
            let stat = &mut table.kmers[members[0]].stat;
            if Self::passes_thresholds(stat, bayes) {
                stat.flags |= FLAG_GOOD | FLAG_GOOD_ITER;
                stats.solid += 1;
            }
            return;
        }

        let center = members
            .iter()
            .copied()
            .max_by(|&a, &b| {
                Self::center_score(&table.kmers[a].stat)
                    .partial_cmp(&Self::center_score(&table.kmers[b].stat))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.cmp(&a)) // deterministic tie-break: lowest index
            })
            .expect("non-empty cluster");

        for &m in members {
            let (good, good_iter);
            {
                let stat = &table.kmers[m].stat;
                good = Self::passes_thresholds(stat, bayes);
                good_iter = m == center
                    && (bayes.discard_only_singletons || Self::passes_thresholds(stat, bayes));
            }
            let stat = &mut table.kmers[m].stat;
            if good {
                stat.flags |= FLAG_GOOD;
            }
            if good_iter {
                stat.flags |= FLAG_GOOD_ITER;
                stats.solid += 1;
            }
            if m != center {
                stat.set_change(center as u64);
                stats.rewired += 1;
            }
        }
    }
}
