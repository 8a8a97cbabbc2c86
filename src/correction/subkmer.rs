//! Sub-k-mer index for Hamming clustering.
//!
//! For radius `tau` every k-mer is cut into `tau + 1` contiguous slices at
//! positions `floor(i * K / (tau + 1))`. Two k-mers at Hamming distance at
//! most `tau` share at least one identical slice (pigeonhole), so scanning
//! runs of equal slices in the sorted slice files enumerates every candidate
//! pair. Slice files are sorted by an in-process external merge sort; slice 0
//! is a k-mer prefix, so file 0 inherits the table's global order and needs
//! no sorting.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::core::blob::Blob;
use crate::core::kmer::K;
use crate::utils;

use super::merger::KmerTable;
use super::HammerContext;

/// Records per in-memory sort chunk of the external sort.
const SORT_CHUNK_RECORDS: usize = 1 << 20;

/// Slice boundaries: `tau + 2` positions from 0 to K.
pub fn sub_kmer_positions(tau: usize) -> Vec<usize> {
    let mut positions: Vec<usize> = (0..=tau).map(|i| i * K / (tau + 1)).collect();
    positions.push(K);
    positions
}

/// One `(slice_bytes, kmer_index)` record of a slice file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRecord {
    pub slice: Vec<u8>,
    pub index: usize,
}

impl SliceRecord {
    fn parse(line: &str) -> Result<Self> {
        let (slice, index) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("malformed slice record: {line:?}"))?;
        Ok(Self {
            slice: slice.as_bytes().to_vec(),
            index: index.parse().context("slice record index")?,
        })
    }
}

impl PartialOrd for SliceRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SliceRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.slice.cmp(&other.slice).then(self.index.cmp(&other.index))
    }
}

pub struct SubKmerIndex<'a> {
    ctx: &'a HammerContext,
}

impl<'a> SubKmerIndex<'a> {
    pub fn new(ctx: &'a HammerContext) -> Self {
        Self { ctx }
    }

    /// Writes and sorts the `tau + 1` slice files for the table. Returns the
    /// sorted file paths, indexed by slice number.
    pub fn build(&self, blob: &Blob, table: &KmerTable) -> Result<Vec<PathBuf>> {
        let cfg = &self.ctx.cfg;
        let tau = cfg.general.tau as usize;
        let positions = sub_kmer_positions(tau);
        info!(
            "writing sub-k-mer slices: tau={tau}, k={K}, positions {positions:?}"
        );

        // slice 0 is a prefix of the k-mer, so the table's global order is
        // already the sorted order for file 0
        let mut paths = Vec::with_capacity(tau + 1);
        for j in 0..=tau {
            let suffix = if j == 0 { "subkmers.sorted" } else { "subkmers" };
            let path = utils::iter_file_num(&self.ctx.work_dir, self.ctx.iteration, suffix, j);
            let mut w = utils::open_writer_with_capacity(
                &path,
                cfg.general.gzip,
                1usize << cfg.general.file_buffer_exp,
            )?;
            for (i, pos) in table.kmernos.iter().enumerate() {
                let bytes = blob.kmer_bytes(*pos);
                let slice = &bytes[positions[j]..positions[j + 1]];
                w.write_all(slice)?;
                w.write_all(format!("\t{i}\n").as_bytes())?;
            }
            w.flush()?;
            paths.push(path);
        }

        // external sort for slices 1..=tau
        let mut sorted_paths = vec![paths[0].clone()];
        for (j, path) in paths.iter().enumerate().skip(1) {
            let sorted = utils::iter_file_num(
                &self.ctx.work_dir,
                self.ctx.iteration,
                "subkmers.sorted",
                j,
            );
            external_sort(path, &sorted, SORT_CHUNK_RECORDS, cfg.general.gzip)?;
            utils::remove_temp_file(cfg.general.remove_temp_files, path);
            sorted_paths.push(sorted);
        }
        Ok(sorted_paths)
    }
}

/// Streaming cursor over one sorted run file.
struct RunCursor {
    reader: Box<dyn BufRead + Send>,
    current: SliceRecord,
    run: usize,
}

impl PartialEq for RunCursor {
    fn eq(&self, other: &Self) -> bool {
        self.current == other.current && self.run == other.run
    }
}
impl Eq for RunCursor {}
impl PartialOrd for RunCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for RunCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we need the smallest record
        other
            .current
            .cmp(&self.current)
            .then(other.run.cmp(&self.run))
    }
}

fn read_record(reader: &mut (dyn BufRead + Send)) -> Result<Option<SliceRecord>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(SliceRecord::parse(trimmed)?));
    }
}

/// In-process external merge sort over `(slice, index)` records: read chunks,
/// sort each in memory, spill sorted runs, then k-way merge the runs.
/// Replaces the forked `sort -k1` of the original pipeline.
pub fn external_sort(
    input: &Path,
    output: &Path,
    chunk_records: usize,
    gzip: bool,
) -> Result<()> {
    let mut reader = utils::open_reader(input, gzip)?;
    let mut run_files: Vec<PathBuf> = Vec::new();
    let mut chunk: Vec<SliceRecord> = Vec::with_capacity(chunk_records.min(1 << 16));

    let spill = |chunk: &mut Vec<SliceRecord>, run_no: usize| -> Result<PathBuf> {
        chunk.sort_unstable();
        let path = output.with_extension(format!("run{run_no}"));
        let mut w = utils::open_writer(&path, gzip)?;
        for rec in chunk.iter() {
            w.write_all(&rec.slice)?;
            w.write_all(format!("\t{}\n", rec.index).as_bytes())?;
        }
        w.flush()?;
        chunk.clear();
        Ok(path)
    };

    while let Some(rec) = read_record(reader.as_mut())? {
        chunk.push(rec);
        if chunk.len() >= chunk_records {
            let path = spill(&mut chunk, run_files.len())?;
            run_files.push(path);
        }
    }

    if run_files.is_empty() {
        // everything fit in memory: sort and write directly
        chunk.sort_unstable();
        let mut w = utils::open_writer(output, gzip)?;
        for rec in &chunk {
            w.write_all(&rec.slice)?;
            w.write_all(format!("\t{}\n", rec.index).as_bytes())?;
        }
        w.flush()?;
        return Ok(());
    }
    if !chunk.is_empty() {
        let path = spill(&mut chunk, run_files.len())?;
        run_files.push(path);
    }
    debug!(
        "external sort of {}: merging {} runs",
        input.display(),
        run_files.len()
    );

    let mut heap: BinaryHeap<RunCursor> = BinaryHeap::new();
    for (run, path) in run_files.iter().enumerate() {
        let mut reader = utils::open_reader(path, gzip)?;
        if let Some(first) = read_record(reader.as_mut())? {
            heap.push(RunCursor {
                reader,
                current: first,
                run,
            });
        }
    }
    let mut w = utils::open_writer(output, gzip)?;
    while let Some(mut cursor) = heap.pop() {
        w.write_all(&cursor.current.slice)?;
        w.write_all(format!("\t{}\n", cursor.current.index).as_bytes())?;
        if let Some(next) = read_record(cursor.reader.as_mut())? {
            cursor.current = next;
            heap.push(cursor);
        }
    }
    w.flush()?;
    for path in run_files {
        utils::remove_temp_file(true, &path);
    }
    Ok(())
}

/// Streams runs of equal slices from a sorted slice file, invoking `f` with
/// the k-mer indices of each run of size at least 2.
pub fn for_each_slice_run(
    path: &Path,
    gzip: bool,
    mut f: impl FnMut(&[usize]),
) -> Result<()> {
    let mut reader = utils::open_reader(path, gzip)?;
    let mut run_slice: Vec<u8> = Vec::new();
    let mut run: Vec<usize> = Vec::new();
    while let Some(rec) = read_record(reader.as_mut())? {
        if rec.slice != run_slice {
            if run.len() > 1 {
                f(&run);
            }
            run_slice = rec.slice;
            run.clear();
        }
        run.push(rec.index);
    }
    if run.len() > 1 {
        f(&run);
    }
    Ok(())
}
