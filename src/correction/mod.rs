//! The Hammer correction engine: k-mer counting, Hamming clustering,
//! iterative solid-set expansion and per-read consensus rewrite.
//!
//! One [`HammerEngine::run_iteration`] call performs a full correction
//! iteration over a set of input read streams:
//!
//! 1. build the blob (forward reads, then reverse complements),
//! 2. split valid k-mer instances into hash buckets on disk,
//! 3. merge buckets into the global k-mer table,
//! 4. build and sort the sub-k-mer slice files,
//! 5. cluster k-mers under the Hamming radius and elect centers,
//! 6. expand the solid set to its fixpoint,
//! 7. rewrite reads by consensus and route them to output streams.
//!
//! The blob and the k-mer table are rebuilt per iteration; nothing reads
//! global state; everything flows through [`HammerContext`].

pub mod clustering;
pub mod consensus;
pub mod expansion;
pub mod merger;
pub mod splitter;
pub mod subkmer;

use std::ops::Range;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::blob::Blob;
use crate::core::kmer::K;
use crate::core::read::{FastqSink, ReadStream};
use crate::utils;
use crate::utils::configuration::PipelineConfig;

pub use clustering::{ClusterStats, HammingClusterer};
pub use consensus::{
    route_paired, CorrectionOutcome, CorrectionReport, PairedSinks, ReadCorrector,
};
pub use expansion::{SolidExpander, SolidFlags};
pub use merger::{BucketMerger, KmerTable};
pub use splitter::KmerSplitter;
pub use subkmer::SubKmerIndex;

/// Everything a correction stage needs: configuration, the working
/// directory for iteration-numbered temporaries, and the iteration number.
pub struct HammerContext {
    pub cfg: PipelineConfig,
    pub work_dir: PathBuf,
    pub iteration: usize,
}

/// One named input stream feeding the engine.
pub struct InputFile {
    pub base: String,
    pub stream: Box<dyn ReadStream>,
}

/// Summary of one correction iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct IterationReport {
    pub reads: u64,
    pub skipped_short: u64,
    pub distinct_kmers: usize,
    pub kmer_occurrences: u64,
    pub clusters: usize,
    pub promoted: u64,
    pub correction: CorrectionReport,
}

pub struct HammerEngine {
    ctx: HammerContext,
}

impl HammerEngine {
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate().context("validating configuration")?;
        let work_dir = cfg.general.work_dir.clone();
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("creating working directory {}", work_dir.display()))?;
        Ok(Self {
            ctx: HammerContext {
                cfg,
                work_dir,
                iteration: 0,
            },
        })
    }

    pub fn context(&self) -> &HammerContext {
        &self.ctx
    }

    pub fn set_iteration(&mut self, iteration: usize) {
        self.ctx.iteration = iteration;
    }

    /// Builds the blob from the input streams: trims each read, skips reads
    /// shorter than K, records per-file id ranges, then appends the
    /// reverse-complement section. Single-threaded by design.
    pub fn build_blob(
        &self,
        inputs: &mut [InputFile],
    ) -> Result<(Blob, Vec<Range<u64>>, u64)> {
        let trim_quality = self.ctx.cfg.input.trim_quality;
        let mut blob = Blob::new(self.ctx.cfg.input.common_quality);
        let mut ranges = Vec::with_capacity(inputs.len());
        let mut skipped = 0u64;
        for input in inputs.iter_mut() {
            let start = blob.rev_no_hint();
            while let Some(mut read) = input.stream.next_read()? {
                if read.trim_ns_and_bad_quality(trim_quality) < K {
                    skipped += 1;
                    continue;
                }
                blob.append_read(&read.name, &read.seq, &read.qual);
            }
            ranges.push(start..blob.rev_no_hint());
        }
        blob.append_reverse_complements();
        info!(
            "blob built: {} reads ({} skipped as too short), {} bases",
            blob.rev_no(),
            skipped,
            blob.len()
        );
        Ok((blob, ranges, skipped))
    }

    /// Counts k-mers: split into buckets, merge, write the binary dumps.
    pub fn count_kmers(&self, blob: &Blob) -> Result<KmerTable> {
        let files = KmerSplitter::new(&self.ctx).split(blob)?;
        let table = BucketMerger::new(&self.ctx).merge(blob, &files)?;
        BucketMerger::new(&self.ctx).serialize_table(&table)?;
        Ok(table)
    }

    /// Slices, sorts, clusters, and expands the solid set.
    pub fn cluster_and_expand(
        &self,
        blob: &Blob,
        table: &mut KmerTable,
    ) -> Result<(ClusterStats, u64)> {
        let slice_files = SubKmerIndex::new(&self.ctx).build(blob, table)?;
        let stats = HammingClusterer::new(&self.ctx).cluster(blob, table, &slice_files)?;
        for p in &slice_files {
            utils::remove_temp_file(self.ctx.cfg.general.remove_temp_files, p);
        }
        let promoted = SolidExpander::new(&self.ctx).expand(blob, table)?;
        Ok((stats, promoted))
    }

    /// Full iteration with FASTQ outputs in the working directory. The first
    /// two inputs are treated as a pair when present; any remaining input is
    /// corrected as single-ended. Returns the iteration report.
    pub fn run_iteration(&self, inputs: &mut [InputFile]) -> Result<IterationReport> {
        let bases: Vec<String> = inputs.iter().map(|i| i.base.clone()).collect();
        let (blob, ranges, skipped) = self.build_blob(inputs)?;
        let mut table = self.count_kmers(&blob)?;
        let (cluster_stats, promoted) = self.cluster_and_expand(&blob, &mut table)?;

        let corrector = ReadCorrector::new(&self.ctx, &blob, &table);
        let mut report = IterationReport {
            reads: blob.rev_no(),
            skipped_short: skipped,
            distinct_kmers: table.len(),
            kmer_occurrences: table.total_occurrences(),
            clusters: cluster_stats.clusters,
            promoted,
            ..Default::default()
        };

        let qv = self.ctx.cfg.input.qvoffset;
        let gzip = self.ctx.cfg.general.gzip;
        let dir = &self.ctx.work_dir;
        let iter = self.ctx.iteration;

        let mut next_single = 0usize;
        if bases.len() >= 2 {
            let mut cor_l = FastqSink::create(&utils::reads_file(dir, &bases[0], iter, "cor"), qv, gzip)?;
            let mut bad_l = FastqSink::create(&utils::reads_file(dir, &bases[0], iter, "bad"), qv, gzip)?;
            let mut cor_r = FastqSink::create(&utils::reads_file(dir, &bases[1], iter, "cor"), qv, gzip)?;
            let mut bad_r = FastqSink::create(&utils::reads_file(dir, &bases[1], iter, "bad"), qv, gzip)?;
            let unpaired_base = format!("{}_{}.unpaired", bases[0], bases[1]);
            let mut unp = FastqSink::create(&utils::reads_file(dir, &unpaired_base, iter, "cor"), qv, gzip)?;
            let mut sinks = PairedSinks {
                cor_left: &mut cor_l,
                cor_right: &mut cor_r,
                bad_left: &mut bad_l,
                bad_right: &mut bad_r,
                unpaired: &mut unp,
            };
            let pair_report =
                corrector.correct_paired(ranges[0].clone(), ranges[1].clone(), &mut sinks)?;
            merge_reports(&mut report.correction, pair_report);
            cor_l.finish()?;
            bad_l.finish()?;
            cor_r.finish()?;
            bad_r.finish()?;
            unp.finish()?;
            next_single = 2;
        }
        for (i, base) in bases.iter().enumerate().skip(next_single) {
            let mut good = FastqSink::create(&utils::reads_file(dir, base, iter, "cor"), qv, gzip)?;
            let mut bad = FastqSink::create(&utils::reads_file(dir, base, iter, "bad"), qv, gzip)?;
            let single_report =
                corrector.correct_range(ranges[i].clone(), &mut good, &mut bad)?;
            merge_reports(&mut report.correction, single_report);
            good.finish()?;
            bad.finish()?;
        }

        info!(
            "iteration {iter} done: {} reads, {} distinct k-mers, {} changed reads",
            report.reads, report.distinct_kmers, report.correction.changed_reads
        );
        Ok(report)
    }
}

fn merge_reports(total: &mut CorrectionReport, part: CorrectionReport) {
    total.total_reads += part.total_reads;
    total.good_reads += part.good_reads;
    total.bad_reads += part.bad_reads;
    total.changed_reads += part.changed_reads;
    total.changed_nucleotides += part.changed_nucleotides;
}

impl Blob {
    /// Forward read count while the blob is still being built.
    fn rev_no_hint(&self) -> u64 {
        self.total_reads() as u64
    }
}
