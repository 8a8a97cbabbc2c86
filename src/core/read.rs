//! Read stream and sink abstractions.
//!
//! The engine never parses FASTQ itself; callers feed it anything that
//! implements [`ReadStream`] and collect corrected output through
//! [`ReadSink`]s. A gzip-aware FASTQ sink is provided for the conventional
//! `*.cor.fastq` / `*.bad.fastq` outputs.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use super::kmer;

/// A read with raw Phred qualities (offset already removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedRead {
    pub name: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl SequencedRead {
    pub fn new(name: impl Into<String>, seq: Vec<u8>, qual: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            seq,
            qual,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Trims leading/trailing ambiguous bases and trailing bases below the
    /// Phred threshold, in place. Returns the remaining length. Interior
    /// ambiguous bases are left for the valid k-mer generator to step over.
    pub fn trim_ns_and_bad_quality(&mut self, trim_quality: u8) -> usize {
        let bad = |i: usize| {
            kmer::nt_index(self.seq[i]).is_none()
                || self.qual.get(i).is_some_and(|&q| q < trim_quality)
        };
        let mut from = 0;
        while from < self.seq.len() && bad(from) {
            from += 1;
        }
        let mut to = self.seq.len();
        while to > from && bad(to - 1) {
            to -= 1;
        }
        self.seq.drain(to..);
        self.seq.drain(..from);
        if !self.qual.is_empty() {
            self.qual.drain(to.min(self.qual.len())..);
            self.qual.drain(..from.min(self.qual.len()));
        }
        self.seq.len()
    }

    pub fn reverse_complement(&self) -> SequencedRead {
        SequencedRead {
            name: self.name.clone(),
            seq: kmer::reverse_complement(&self.seq),
            qual: self.qual.iter().rev().copied().collect(),
        }
    }
}

/// Source of reads. Implementations wrap FASTQ parsers, in-memory vectors, etc.
pub trait ReadStream {
    fn next_read(&mut self) -> Result<Option<SequencedRead>>;
}

/// Destination for corrected / rejected reads.
pub trait ReadSink {
    fn write_read(&mut self, read: &SequencedRead) -> Result<()>;
}

/// In-memory stream, used by tests and small pipelines.
pub struct VecReadStream {
    reads: std::vec::IntoIter<SequencedRead>,
}

impl VecReadStream {
    pub fn new(reads: Vec<SequencedRead>) -> Self {
        Self {
            reads: reads.into_iter(),
        }
    }
}

impl ReadStream for VecReadStream {
    fn next_read(&mut self) -> Result<Option<SequencedRead>> {
        Ok(self.reads.next())
    }
}

/// In-memory sink collecting everything written to it.
#[derive(Default)]
pub struct VecSink {
    pub reads: Vec<SequencedRead>,
}

impl ReadSink for VecSink {
    fn write_read(&mut self, read: &SequencedRead) -> Result<()> {
        self.reads.push(read.clone());
        Ok(())
    }
}

/// FASTQ writer with the conventional `+` separator line and a configurable
/// quality value offset; transparently gzips when asked.
pub struct FastqSink {
    out: Box<dyn Write + Send>,
    qv_offset: u8,
}

impl FastqSink {
    pub fn create(path: &Path, qv_offset: u8, gzip: bool) -> Result<Self> {
        let out = crate::utils::open_writer(path, gzip)
            .with_context(|| format!("creating output file {}", path.display()))?;
        Ok(Self { out, qv_offset })
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl ReadSink for FastqSink {
    fn write_read(&mut self, read: &SequencedRead) -> Result<()> {
        self.out.write_all(b"@")?;
        self.out.write_all(read.name.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.write_all(&read.seq)?;
        self.out.write_all(b"\n+\n")?;
        if read.qual.len() == read.seq.len() {
            let encoded: Vec<u8> = read
                .qual
                .iter()
                .map(|&q| q.saturating_add(self.qv_offset))
                .collect();
            self.out.write_all(&encoded)?;
        } else {
            // common-quality mode: emit a flat maximal-confidence line
            self.out
                .write_all(&vec![b'I'; read.seq.len()])?;
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }
}
