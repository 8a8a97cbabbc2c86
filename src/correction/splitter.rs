//! K-mer instance splitter: streams blob reads, generates valid k-mers and
//! partitions `(offset, error_prob)` records into hash-indexed bucket files.
//!
//! Parallelism: reads are processed in batches; inside a batch each rayon
//! worker fills its own per-bucket staging buffers, and a flush phase appends
//! them to the on-disk files under bucket-level exclusion. The bucket hash is
//! a fixed-seed `ahash` so partitioning is reproducible across runs.

use std::hash::BuildHasher;
use std::io::Write;
use std::path::PathBuf;

use ahash::RandomState;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::blob::Blob;
use crate::core::kmer::ValidKmerGenerator;
use crate::utils;

use super::HammerContext;

/// Fixed seeds so bucket assignment is stable across runs and processes.
const BUCKET_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0x2545_f491_4f6c_dd1d,
    0x27d4_eb2f_1656_67c5,
    0x1656_67b1_9e37_79f9,
);

pub struct KmerSplitter<'a> {
    ctx: &'a HammerContext,
    hasher: RandomState,
}

impl<'a> KmerSplitter<'a> {
    pub fn new(ctx: &'a HammerContext) -> Self {
        let (a, b, c, d) = BUCKET_SEEDS;
        Self {
            ctx,
            hasher: RandomState::with_seeds(a, b, c, d),
        }
    }

    #[inline]
    fn bucket_of(&self, kmer: &[u8], numfiles: usize) -> usize {
        (self.hasher.hash_one(kmer) % numfiles as u64) as usize
    }

    /// Splits every valid k-mer instance of the blob into `numfiles` bucket
    /// files named `NN.tmp.kmers.<i>`. Returns the bucket paths.
    pub fn split(&self, blob: &Blob) -> Result<Vec<PathBuf>> {
        let cfg = &self.ctx.cfg;
        let numfiles = cfg.count.numfiles;
        let nthreads = cfg.count.merge_nthreads.min(cfg.general.max_threads).max(1);
        let readbuffer = cfg.count.split_buffer.max(1);
        info!(
            "splitting k-mer instances into {numfiles} buckets using {nthreads} threads"
        );

        let paths: Vec<PathBuf> = (0..numfiles)
            .map(|i| utils::iter_file_num(&self.ctx.work_dir, self.ctx.iteration, "tmp.kmers", i))
            .collect();
        let writers: Vec<Mutex<Box<dyn Write + Send>>> = paths
            .iter()
            .map(|p| {
                utils::open_writer_with_capacity(
                    p,
                    cfg.general.gzip,
                    1usize << cfg.general.file_buffer_exp,
                )
                .map(Mutex::new)
            })
            .collect::<Result<_>>()
            .context("creating k-mer bucket files")?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("kmer-split-{i}"))
            .build()
            .context("building splitter thread pool")?;

        let total = blob.total_reads();
        let staging_cap = (readbuffer * 5 / 4) / nthreads.max(1) + 1;
        let common_quality = blob.common_quality().unwrap_or(0);
        let write_error: Mutex<Option<std::io::Error>> = Mutex::new(None);

        let mut batch_start = 0usize;
        let mut batch_no = 0usize;
        while batch_start < total {
            let batch_end = (batch_start + readbuffer).min(total);
            debug!("split batch {batch_no}: reads {batch_start}..{batch_end}");
            pool.install(|| {
                (batch_start..batch_end)
                    .into_par_iter()
                    .fold(
                        || vec![Vec::<(u64, f64)>::with_capacity(staging_cap); numfiles],
                        |mut staging, readno| {
                            let read = blob.read_at(readno as u64);
                            let seq = blob.read_seq(read);
                            let qual = blob.read_qual(read);
                            for vk in ValidKmerGenerator::new(seq, qual, common_quality) {
                                let pos = blob.pos_for(read, vk.pos);
                                let bucket =
                                    self.bucket_of(blob.kmer_bytes(pos), numfiles);
                                staging[bucket].push((pos.as_u64(), vk.error_prob));
                            }
                            staging
                        },
                    )
                    .for_each(|staging| {
                        // flush this worker's buffers under bucket-level locks
                        for (bucket, entries) in staging.into_iter().enumerate() {
                            if entries.is_empty() {
                                continue;
                            }
                            let mut out = String::with_capacity(entries.len() * 24);
                            for (offset, errprob) in entries {
                                out.push_str(&format!("{offset}\t{errprob}\n"));
                            }
                            let mut w = writers[bucket].lock();
                            // writes are line-atomic per buffer; interleaving
                            // across workers is fine, order is arbitrary
                            if let Err(e) = w.write_all(out.as_bytes()) {
                                write_error.lock().get_or_insert(e);
                            }
                        }
                    });
            });
            batch_start = batch_end;
            batch_no += 1;
        }

        if let Some(e) = write_error.into_inner() {
            return Err(e).context("writing k-mer bucket file");
        }
        for w in writers {
            w.into_inner().flush().context("flushing k-mer bucket file")?;
        }
        Ok(paths)
    }
}
