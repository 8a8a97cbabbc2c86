//! Per-read consensus correction.
//!
//! For a read of length `L` a 4xL vote matrix is filled from trusted k-mers:
//! solid k-mers vote with their own letters, k-mers with a trusted cluster
//! center vote with the center's letters. Votes from the reverse-complement
//! copy of the read are folded in with complemented letters at mirrored
//! positions, and the kept window `[left, right + K - 1]` is the symmetric
//! union of both strands' solid windows. The final sequence takes the argmax
//! vote per position (ties keep the input base) and is trimmed to the window.

use anyhow::Result;
use rayon::prelude::*;
use tracing::info;

use crate::core::blob::Blob;
use crate::core::kmer::{complement, index_nt, nt_index, ValidKmerGenerator, K};
use crate::core::read::{ReadSink, SequencedRead};

use super::merger::KmerTable;
use super::HammerContext;

/// Result of correcting one read.
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub read: SequencedRead,
    /// False when no trusted k-mer covered the read; such reads go to the
    /// "bad" stream uncorrected.
    pub is_good: bool,
    pub changed_bases: usize,
}

/// Aggregate counters for a correction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrectionReport {
    pub total_reads: u64,
    pub good_reads: u64,
    pub bad_reads: u64,
    pub changed_reads: u64,
    pub changed_nucleotides: u64,
}

impl CorrectionReport {
    fn absorb(&mut self, outcome: &CorrectionOutcome) {
        self.total_reads += 1;
        if outcome.is_good {
            self.good_reads += 1;
        } else {
            self.bad_reads += 1;
        }
        if outcome.changed_bases > 0 {
            self.changed_reads += 1;
            self.changed_nucleotides += outcome.changed_bases as u64;
        }
    }
}

pub struct ReadCorrector<'a> {
    ctx: &'a HammerContext,
    blob: &'a Blob,
    table: &'a KmerTable,
}

impl<'a> ReadCorrector<'a> {
    pub fn new(ctx: &'a HammerContext, blob: &'a Blob, table: &'a KmerTable) -> Self {
        Self { ctx, blob, table }
    }

    /// Whether this k-mer index may vote, and with which letters: its own
    /// (`None`) or its cluster center's (`Some(center)`).
    fn trusted_vote(&self, idx: usize) -> Option<Option<usize>> {
        let correct_threshold = self.ctx.cfg.correct.use_threshold;
        let discard_singletons = self.ctx.cfg.bayes.discard_only_singletons;
        let stat = &self.table.kmers[idx].stat;
        if stat.is_good_for_iterative() || (correct_threshold && stat.is_good()) {
            return Some(None);
        }
        if stat.has_change() {
            let center = stat.change_to as usize;
            let center_trusted = discard_singletons
                || self.table.kmers[center].stat.is_good_for_iterative()
                || (correct_threshold && stat.is_good());
            if center_trusted {
                return Some(Some(center));
            }
        }
        None
    }

    /// Corrects the forward read `readno` (`readno < rev_no`).
    pub fn correct_read(&self, readno: u64) -> CorrectionOutcome {
        let blob = self.blob;
        let read = blob.read_at(readno);
        let seq = blob.read_seq(read);
        let size = seq.len();
        let common_quality = blob.common_quality().unwrap_or(0);

        let mut votes = vec![[0u32; 4]; size];
        let mut left = size as i64;
        let mut right = -1i64;

        // forward strand votes
        for vk in ValidKmerGenerator::new(seq, &[], common_quality) {
            let window = &seq[vk.pos..vk.pos + K];
            let Some(idx) = self.table.find(blob, window) else {
                continue;
            };
            let Some(vote_as) = self.trusted_vote(idx) else {
                continue;
            };
            let letters: &[u8] = match vote_as {
                None => window,
                Some(center) => blob.kmer_bytes(self.table.kmers[center].pos),
            };
            for (j, &base) in letters.iter().enumerate() {
                if let Some(n) = nt_index(base) {
                    votes[vk.pos + j][n] += 1;
                }
            }
            left = left.min(vk.pos as i64);
            right = right.max(vk.pos as i64);
        }

        // reverse-complement strand votes, folded into forward coordinates
        let rc_read = blob.read_at(readno + blob.rev_no());
        let rc_seq = blob.read_seq(rc_read);
        let mut left_rev = size as i64;
        let mut right_rev = -1i64;
        for vk in ValidKmerGenerator::new(rc_seq, &[], common_quality) {
            let window = &rc_seq[vk.pos..vk.pos + K];
            let Some(idx) = self.table.find(blob, window) else {
                continue;
            };
            let Some(vote_as) = self.trusted_vote(idx) else {
                continue;
            };
            let letters: &[u8] = match vote_as {
                None => window,
                Some(center) => blob.kmer_bytes(self.table.kmers[center].pos),
            };
            for (j, &base) in letters.iter().enumerate() {
                // rc position p+j maps to forward position size-1-(p+j)
                let fwd = size - 1 - (vk.pos + j);
                if let Some(n) = nt_index(complement(base)) {
                    votes[fwd][n] += 1;
                }
            }
            left_rev = left_rev.min(vk.pos as i64);
            right_rev = right_rev.max(vk.pos as i64);
        }

        // symmetric union of the two strands' windows (forward coordinates)
        if right_rev >= left_rev {
            let fwd_left = size as i64 - right_rev - K as i64;
            let fwd_right = size as i64 - left_rev - K as i64;
            left = left.min(fwd_left);
            right = right.max(fwd_right);
        }

        if right < left {
            return CorrectionOutcome {
                read: SequencedRead::new(blob.read_name(readno), seq.to_vec(), blob.read_qual(read).to_vec()),
                is_good: false,
                changed_bases: 0,
            };
        }

        // consensus: argmax vote per position, ties keep the input base
        let mut corrected = seq.to_vec();
        let mut changed = 0usize;
        for (j, vote) in votes.iter().enumerate() {
            let input_votes = nt_index(corrected[j]).map_or(0, |n| vote[n]);
            let mut best = corrected[j];
            let mut best_votes = input_votes;
            for (n, &count) in vote.iter().enumerate() {
                if count > best_votes {
                    best = index_nt(n);
                    best_votes = count;
                }
            }
            if corrected[j] != best {
                corrected[j] = best;
                changed += 1;
            }
        }

        // trim to [left, right + K - 1]
        let from = left.max(0) as usize;
        let to = ((right + K as i64) as usize).min(size);
        let qual = blob.read_qual(read);
        let out_qual: Vec<u8> = if qual.is_empty() {
            Vec::new()
        } else {
            qual[from..to].to_vec()
        };
        CorrectionOutcome {
            read: SequencedRead::new(blob.read_name(readno), corrected[from..to].to_vec(), out_qual),
            is_good: true,
            changed_bases: changed,
        }
    }

    /// Corrects a contiguous id range of forward reads in parallel and
    /// streams outcomes to `good`/`bad` sinks, write-out serialized by batch.
    pub fn correct_range(
        &self,
        ids: std::ops::Range<u64>,
        good: &mut dyn ReadSink,
        bad: &mut dyn ReadSink,
    ) -> Result<CorrectionReport> {
        let batch = (self.ctx.cfg.correct.readbuffer * self.ctx.cfg.correct.nthreads).max(1);
        let mut report = CorrectionReport::default();
        let mut start = ids.start;
        while start < ids.end {
            let end = (start + batch as u64).min(ids.end);
            let outcomes: Vec<CorrectionOutcome> = (start..end)
                .into_par_iter()
                .map(|readno| self.correct_read(readno))
                .collect();
            for outcome in &outcomes {
                report.absorb(outcome);
                if outcome.is_good {
                    good.write_read(&outcome.read)?;
                } else {
                    bad.write_read(&outcome.read)?;
                }
            }
            start = end;
        }
        info!(
            "corrected {} reads: {} good, {} bad, {} bases changed in {} reads",
            report.total_reads,
            report.good_reads,
            report.bad_reads,
            report.changed_nucleotides,
            report.changed_reads
        );
        Ok(report)
    }
}

/// Output sinks for paired correction.
pub struct PairedSinks<'a> {
    pub cor_left: &'a mut dyn ReadSink,
    pub cor_right: &'a mut dyn ReadSink,
    pub bad_left: &'a mut dyn ReadSink,
    pub bad_right: &'a mut dyn ReadSink,
    pub unpaired: &'a mut dyn ReadSink,
}

/// Routes a corrected pair: both good go to the paired outputs, exactly one
/// good goes to the unpaired stream (the bad side to its bad stream), both
/// bad go to the bad streams.
pub fn route_paired(
    left: &CorrectionOutcome,
    right: &CorrectionOutcome,
    sinks: &mut PairedSinks<'_>,
) -> Result<()> {
    match (left.is_good, right.is_good) {
        (true, true) => {
            sinks.cor_left.write_read(&left.read)?;
            sinks.cor_right.write_read(&right.read)?;
        }
        (true, false) => {
            sinks.unpaired.write_read(&left.read)?;
            sinks.bad_right.write_read(&right.read)?;
        }
        (false, true) => {
            sinks.bad_left.write_read(&left.read)?;
            sinks.unpaired.write_read(&right.read)?;
        }
        (false, false) => {
            sinks.bad_left.write_read(&left.read)?;
            sinks.bad_right.write_read(&right.read)?;
        }
    }
    Ok(())
}

impl<'a> ReadCorrector<'a> {
    /// Corrects two parallel id ranges as read pairs, batch-parallel with
    /// serialized write-out.
    pub fn correct_paired(
        &self,
        left_ids: std::ops::Range<u64>,
        right_ids: std::ops::Range<u64>,
        sinks: &mut PairedSinks<'_>,
    ) -> Result<CorrectionReport> {
        assert_eq!(
            left_ids.end - left_ids.start,
            right_ids.end - right_ids.start,
            "paired files must contain the same number of reads"
        );
        let n = left_ids.end - left_ids.start;
        let batch = (self.ctx.cfg.correct.readbuffer * self.ctx.cfg.correct.nthreads).max(1) as u64;
        let mut report = CorrectionReport::default();
        let mut offset = 0u64;
        while offset < n {
            let upto = (offset + batch).min(n);
            let pairs: Vec<(CorrectionOutcome, CorrectionOutcome)> = (offset..upto)
                .into_par_iter()
                .map(|i| {
                    (
                        self.correct_read(left_ids.start + i),
                        self.correct_read(right_ids.start + i),
                    )
                })
                .collect();
            for (l, r) in &pairs {
                report.absorb(l);
                report.absorb(r);
                route_paired(l, r, sinks)?;
            }
            offset = upto;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::read::VecSink;

    #[test]
    fn paired_routing_one_good_one_bad() {
        let good = CorrectionOutcome {
            read: SequencedRead::new("l", vec![b'A'; K], vec![]),
            is_good: true,
            changed_bases: 0,
        };
        let bad = CorrectionOutcome {
            read: SequencedRead::new("r", vec![b'C'; K], vec![]),
            is_good: false,
            changed_bases: 0,
        };
        let (mut cl, mut cr, mut bl, mut br, mut un) = (
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
        );
        let mut sinks = PairedSinks {
            cor_left: &mut cl,
            cor_right: &mut cr,
            bad_left: &mut bl,
            bad_right: &mut br,
            unpaired: &mut un,
        };
        route_paired(&good, &bad, &mut sinks).unwrap();
        assert_eq!(un.reads.len(), 1);
        assert_eq!(br.reads.len(), 1);
        assert!(cl.reads.is_empty() && cr.reads.is_empty() && bl.reads.is_empty());
    }

    #[test]
    fn paired_routing_both_good() {
        let outcome = |name: &str| CorrectionOutcome {
            read: SequencedRead::new(name, vec![b'G'; K], vec![]),
            is_good: true,
            changed_bases: 0,
        };
        let (mut cl, mut cr, mut bl, mut br, mut un) = (
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
            VecSink::default(),
        );
        let mut sinks = PairedSinks {
            cor_left: &mut cl,
            cor_right: &mut cr,
            bad_left: &mut bl,
            bad_right: &mut br,
            unpaired: &mut un,
        };
        route_paired(&outcome("l"), &outcome("r"), &mut sinks).unwrap();
        assert_eq!(cl.reads.len(), 1);
        assert_eq!(cr.reads.len(), 1);
        assert!(un.reads.is_empty());
    }
}
