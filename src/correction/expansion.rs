//! Iterative expansion of the solid k-mer set.
//!
//! A forward read completely covered by solid k-mers is marked done and all
//! of its k-mers are promoted to the solid set. Promotion is a single atomic
//! fetch-or on the flag word; the change counter is a separate atomic. Solid
//! flags are only ever set within a cycle, so the fixpoint terminates.

use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::blob::Blob;
use crate::core::kmer::{ValidKmerGenerator, FLAG_GOOD_ITER, FLAG_MARKED, K};
use crate::utils;

use super::merger::KmerTable;
use super::HammerContext;

/// Shared atomic view of the per-k-mer flag words used during expansion.
pub struct SolidFlags {
    bits: Vec<AtomicU8>,
}

impl SolidFlags {
    pub fn from_table(table: &KmerTable) -> Self {
        Self {
            bits: table
                .kmers
                .iter()
                .map(|k| AtomicU8::new(k.stat.flags))
                .collect(),
        }
    }

    #[inline]
    pub fn is_solid(&self, idx: usize) -> bool {
        self.bits[idx].load(Ordering::Acquire) & FLAG_GOOD_ITER != 0
    }

    /// Promotes a k-mer to the solid set. Returns true when this call
    /// actually flipped the flag.
    #[inline]
    pub fn promote(&self, idx: usize) -> bool {
        let prev = self.bits[idx].fetch_or(FLAG_GOOD_ITER | FLAG_MARKED, Ordering::AcqRel);
        prev & FLAG_GOOD_ITER == 0
    }

    /// Writes the (monotonically grown) flags back into the table.
    pub fn write_back(&self, table: &mut KmerTable) {
        for (stat, bits) in table
            .kmers
            .iter_mut()
            .map(|k| &mut k.stat)
            .zip(self.bits.iter())
        {
            stat.flags = bits.load(Ordering::Acquire);
        }
    }
}

pub struct SolidExpander<'a> {
    ctx: &'a HammerContext,
}

impl<'a> SolidExpander<'a> {
    pub fn new(ctx: &'a HammerContext) -> Self {
        Self { ctx }
    }

    /// One expansion step over all forward reads. Returns the number of
    /// k-mers promoted in this step.
    pub fn step(&self, blob: &Blob, table: &KmerTable, flags: &SolidFlags) -> u64 {
        let promoted = AtomicU64::new(0);
        let common_quality = blob.common_quality().unwrap_or(0);

        (0..blob.rev_no()).into_par_iter().for_each(|readno| {
            let read = blob.read_at(readno);
            if read.is_done() {
                return;
            }
            let seq = blob.read_seq(read);
            let size = seq.len();
            let mut covered = vec![false; size];
            let mut kmer_indices: Vec<(usize, usize)> = Vec::new();

            for vk in ValidKmerGenerator::new(seq, &[], common_quality) {
                let window = &seq[vk.pos..vk.pos + K];
                if let Some(idx) = table.find(blob, window) {
                    kmer_indices.push((vk.pos, idx));
                    if flags.is_solid(idx) {
                        for slot in covered.iter_mut().skip(vk.pos).take(K) {
                            *slot = true;
                        }
                    }
                }
            }

            if !covered.iter().all(|&c| c) {
                return;
            }

            read.mark_done();
            for &(_, idx) in &kmer_indices {
                if flags.promote(idx) {
                    promoted.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        promoted.load(Ordering::Relaxed)
    }

    /// Runs expansion steps to the fixpoint (bounded by `expand.max_steps`)
    /// and writes the grown flags back into the table. Returns the total
    /// number of promoted k-mers.
    pub fn expand(&self, blob: &Blob, table: &mut KmerTable) -> Result<u64> {
        let flags = SolidFlags::from_table(table);
        let mut total = 0u64;
        for step_no in 0..self.ctx.cfg.expand.max_steps {
            let promoted = self.step(blob, table, &flags);
            debug!("expansion step {step_no}: {promoted} k-mers promoted");
            if self.ctx.cfg.expand.write_each_iteration {
                self.dump_solid(blob, table, &flags, step_no)?;
            }
            total += promoted;
            if promoted == 0 {
                break;
            }
        }
        flags.write_back(table);
        info!("iterative expansion promoted {total} k-mers to the solid set");
        Ok(total)
    }

    /// Debug dump of the currently solid k-mers (`NN.goodkmers.<step>`).
    fn dump_solid(
        &self,
        blob: &Blob,
        table: &KmerTable,
        flags: &SolidFlags,
        step_no: usize,
    ) -> Result<()> {
        let path = utils::iter_file_num(
            &self.ctx.work_dir,
            self.ctx.iteration,
            "goodkmers",
            step_no,
        );
        let mut w = utils::open_writer(&path, self.ctx.cfg.general.gzip)?;
        for (i, k) in table.kmers.iter().enumerate() {
            if flags.is_solid(i) {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{:.6}",
                    String::from_utf8_lossy(blob.kmer_bytes(k.pos)),
                    k.pos.as_u64(),
                    k.stat.count,
                    1.0 - k.stat.total_error_prob
                )?;
            }
        }
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::merger::BucketMerger;
    use crate::correction::splitter::KmerSplitter;
    use crate::core::kmer::FLAG_GOOD_ITER;
    use crate::utils::configuration::PipelineConfig;

    fn expand_over(reads: &[&[u8]], solidify: impl Fn(&Blob, &mut KmerTable)) -> (Blob, KmerTable, u64) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.count.numfiles = 2;
        let ctx = HammerContext {
            cfg,
            work_dir: dir.path().to_path_buf(),
            iteration: 0,
        };
        let mut blob = Blob::new(Some(30));
        for (i, r) in reads.iter().enumerate() {
            blob.append_read(&format!("r{i}"), r, &[]);
        }
        blob.append_reverse_complements();
        let files = KmerSplitter::new(&ctx).split(&blob).unwrap();
        let mut table = BucketMerger::new(&ctx).merge(&blob, &files).unwrap();
        solidify(&blob, &mut table);
        let total = SolidExpander::new(&ctx).expand(&blob, &mut table).unwrap();
        (blob, table, total)
    }

    #[test]
    fn fully_covered_read_promotes_its_kmers() {
        // read of length K+2 has 3 k-mers; make the first and last solid so
        // every position is covered, then expansion promotes the middle one
        let read: Vec<u8> = b"ACGTACGTACGTACGTACGTACG".to_vec();
        let (blob, table, total) = expand_over(&[&read], |blob, table| {
            let first = table.find(blob, &read[0..K]).unwrap();
            let last = table.find(blob, &read[2..2 + K]).unwrap();
            table.kmers[first].stat.flags |= FLAG_GOOD_ITER;
            table.kmers[last].stat.flags |= FLAG_GOOD_ITER;
        });
        assert!(total >= 1);
        let mid = table.find(&blob, &read[1..1 + K]).unwrap();
        assert!(table.kmers[mid].stat.is_good_for_iterative());
        assert!(blob.read_at(0).is_done());
    }

    #[test]
    fn uncovered_read_promotes_nothing() {
        let read: Vec<u8> = b"ACGTACGTACGTACGTACGTACG".to_vec();
        let (blob, _table, total) = expand_over(&[&read], |_, _| {});
        assert_eq!(total, 0);
        assert!(!blob.read_at(0).is_done());
    }

    #[test]
    fn expansion_reaches_fixpoint() {
        let read: Vec<u8> = b"ACGTACGTACGTACGTACGTACG".to_vec();
        let (blob, table, _) = expand_over(&[&read], |blob, table| {
            for i in 0..table.len() {
                table.kmers[i].stat.flags |= FLAG_GOOD_ITER;
            }
            let _ = blob;
        });
        // second expansion over an already saturated table changes nothing
        let dir = tempfile::tempdir().unwrap();
        let ctx = HammerContext {
            cfg: PipelineConfig::default(),
            work_dir: dir.path().to_path_buf(),
            iteration: 0,
        };
        let mut table = table;
        let again = SolidExpander::new(&ctx).expand(&blob, &mut table).unwrap();
        assert_eq!(again, 0);
    }
}
