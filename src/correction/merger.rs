//! Bucket merger: per-bucket sort/unique/aggregate of k-mer instances into
//! [`KmerCount`] records, followed by an n-way merge into the global table.
//!
//! The byproduct `kmernos` vector (blob offsets in global k-mer order) is the
//! ground truth for k-mer identity during correction: a window of a read is
//! located in the table by binary search over `kmernos` comparing blob bytes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::blob::{Blob, BlobPos};
use crate::core::kmer::{KmerCount, KmerStat, K, MAX_QUAL};
use crate::utils;

use super::HammerContext;

/// One k-mer instance as read back from a bucket file.
#[derive(Debug, Clone, Copy)]
struct KmerInstance {
    pos: BlobPos,
    error_prob: f64,
}

/// The global k-mer table for one correction iteration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct KmerTable {
    pub kmers: Vec<KmerCount>,
    /// Blob offsets in global (byte-sorted) k-mer order.
    pub kmernos: Vec<BlobPos>,
}

impl KmerTable {
    pub fn len(&self) -> usize {
        self.kmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kmers.is_empty()
    }

    /// Locates a k-mer by its bytes via binary search over `kmernos`.
    pub fn find(&self, blob: &Blob, window: &[u8]) -> Option<usize> {
        debug_assert_eq!(window.len(), K);
        self.kmernos
            .binary_search_by(|&pos| blob.kmer_bytes(pos).cmp(window))
            .ok()
    }

    /// Total number of counted k-mer occurrences.
    pub fn total_occurrences(&self) -> u64 {
        self.kmers.iter().map(|k| k.stat.count as u64).sum()
    }
}

/// Aggregates a sorted run of equal k-mers into one record. Per-position
/// quality sums are only materialized for k-mers seen more than once.
fn reduce_sorted(blob: &Blob, instances: &[KmerInstance]) -> Vec<KmerCount> {
    let mut out: Vec<KmerCount> = Vec::new();
    let keep_quals = blob.common_quality().is_none();
    let mut qual_sums = [0u32; K];

    fn flush_quals(record: &mut KmerCount, sums: &[u32; K]) {
        if record.stat.count > 1 {
            for (slot, sum) in record.stat.qual_bitset.iter_mut().zip(sums.iter()) {
                *slot = (*sum).min(MAX_QUAL as u32) as u8;
            }
        }
    }

    for inst in instances {
        let same = out
            .last()
            .is_some_and(|last| blob.kmer_bytes(last.pos) == blob.kmer_bytes(inst.pos));
        if same {
            let last = out.last_mut().expect("non-empty");
            last.stat.count += 1;
            last.stat.total_error_prob *= inst.error_prob;
        } else {
            if keep_quals {
                if let Some(prev) = out.last_mut() {
                    flush_quals(prev, &qual_sums);
                }
                qual_sums = [0u32; K];
            }
            out.push(KmerCount {
                pos: inst.pos,
                stat: KmerStat::new(inst.error_prob),
            });
        }
        if keep_quals {
            if let Some(q) = blob.kmer_qual(inst.pos) {
                for (sum, &qv) in qual_sums.iter_mut().zip(q.iter()) {
                    *sum += qv as u32;
                }
            }
        }
    }
    if keep_quals {
        if let Some(prev) = out.last_mut() {
            flush_quals(prev, &qual_sums);
        }
    }
    out
}

/// Loads one bucket file, sorts its instances by k-mer bytes and reduces
/// equal runs. Empty buckets yield an empty vector.
fn process_bucket(blob: &Blob, path: &Path, gzip: bool) -> Result<Vec<KmerCount>> {
    let reader = utils::open_reader(path, gzip)?;
    let mut instances: Vec<KmerInstance> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let (offset, prob) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("malformed bucket record: {line:?}"))?;
        instances.push(KmerInstance {
            pos: BlobPos::new(offset.parse::<u64>().context("bucket offset")?),
            error_prob: prob.parse::<f64>().context("bucket error prob")?,
        });
    }
    instances.sort_unstable_by(|a, b| {
        blob.kmer_bytes(a.pos)
            .cmp(blob.kmer_bytes(b.pos))
            .then(a.pos.cmp(&b.pos))
    });
    Ok(reduce_sorted(blob, &instances))
}

/// Cursor for the n-way merge of sorted bucket vectors.
struct MergeCursor<'a> {
    blob: &'a Blob,
    bucket: usize,
    index: usize,
    key: &'a [u8],
}

impl PartialEq for MergeCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.bucket == other.bucket
    }
}
impl Eq for MergeCursor<'_> {}
impl PartialOrd for MergeCursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MergeCursor<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for the min-heap behaviour of BinaryHeap
        other
            .key
            .cmp(self.key)
            .then(other.bucket.cmp(&self.bucket))
    }
}

pub struct BucketMerger<'a> {
    ctx: &'a HammerContext,
}

impl<'a> BucketMerger<'a> {
    pub fn new(ctx: &'a HammerContext) -> Self {
        Self { ctx }
    }

    /// Merges the bucket files into the global [`KmerTable`]. Bucket files
    /// are removed afterwards when the config says so.
    pub fn merge(&self, blob: &Blob, bucket_files: &[PathBuf]) -> Result<KmerTable> {
        let cfg = &self.ctx.cfg;
        let nthreads = cfg.count.merge_nthreads.min(cfg.general.max_threads).max(1);
        info!(
            "merging {} k-mer buckets in {nthreads} threads",
            bucket_files.len()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("kmer-merge-{i}"))
            .build()
            .context("building merger thread pool")?;

        let buckets: Vec<Vec<KmerCount>> = pool.install(|| {
            bucket_files
                .par_iter()
                .map(|p| process_bucket(blob, p, cfg.general.gzip))
                .collect::<Result<_>>()
        })?;
        for p in bucket_files {
            utils::remove_temp_file(cfg.general.remove_temp_files, p);
        }

        // n-way merge of the per-bucket sorted vectors
        let total: usize = buckets.iter().map(Vec::len).sum();
        let mut kmers: Vec<KmerCount> = Vec::with_capacity(total);
        let mut heap: BinaryHeap<MergeCursor> = BinaryHeap::new();
        for (bucket, vec) in buckets.iter().enumerate() {
            if let Some(first) = vec.first() {
                heap.push(MergeCursor {
                    blob,
                    bucket,
                    index: 0,
                    key: blob.kmer_bytes(first.pos),
                });
            }
        }
        while let Some(cursor) = heap.pop() {
            kmers.push(buckets[cursor.bucket][cursor.index].clone());
            let next = cursor.index + 1;
            if next < buckets[cursor.bucket].len() {
                heap.push(MergeCursor {
                    blob: cursor.blob,
                    bucket: cursor.bucket,
                    index: next,
                    key: blob.kmer_bytes(buckets[cursor.bucket][next].pos),
                });
            }
        }

        let kmernos: Vec<BlobPos> = kmers.iter().map(|k| k.pos).collect();
        debug!("merge done: {} distinct k-mers", kmers.len());
        Ok(KmerTable { kmers, kmernos })
    }

    /// Binary dumps of the table and the `kmernos` vector
    /// (`NN.kmers.total.ser`, `NN.kmers.numbers.ser`).
    pub fn serialize_table(&self, table: &KmerTable) -> Result<()> {
        let total = utils::iter_file(&self.ctx.work_dir, self.ctx.iteration, "kmers.total.ser");
        let mut w = utils::open_writer(&total, false)?;
        bincode::serde::encode_into_std_write(table, &mut w, bincode::config::standard())
            .context("serializing k-mer table")?;
        w.flush()?;

        if !self.ctx.cfg.general.remove_temp_files {
            let numbers =
                utils::iter_file(&self.ctx.work_dir, self.ctx.iteration, "kmers.numbers.ser");
            let mut w = utils::open_writer(&numbers, false)?;
            bincode::serde::encode_into_std_write(
                &table.kmernos,
                &mut w,
                bincode::config::standard(),
            )
            .context("serializing kmernos")?;
            w.flush()?;
        }
        Ok(())
    }

    pub fn deserialize_table(&self) -> Result<KmerTable> {
        let total = utils::iter_file(&self.ctx.work_dir, self.ctx.iteration, "kmers.total.ser");
        let file = std::fs::File::open(&total)
            .with_context(|| format!("opening {}", total.display()))?;
        let mut reader = std::io::BufReader::new(file);
        let table: KmerTable =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .context("deserializing k-mer table")?;
        Ok(table)
    }
}
