//! Shared utilities: working-directory file naming and buffered, optionally
//! gzipped file I/O for the pipeline's intermediate files.

pub mod configuration;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

/// `NN.<suffix>`: iteration-numbered working file.
pub fn iter_file(dir: &Path, iteration: usize, suffix: &str) -> PathBuf {
    dir.join(format!("{iteration:02}.{suffix}"))
}

/// `NN.<suffix>.<num>`: iteration-numbered, per-bucket working file.
pub fn iter_file_num(dir: &Path, iteration: usize, suffix: &str, num: usize) -> PathBuf {
    dir.join(format!("{iteration:02}.{suffix}.{num}"))
}

/// `<base>.NN.<suffix>.fastq`: per-input-file read output.
pub fn reads_file(dir: &Path, base: &str, iteration: usize, suffix: &str) -> PathBuf {
    dir.join(format!("{base}.{iteration:02}.{suffix}.fastq"))
}

/// Removes a temporary file if the config says so; failures are logged, not fatal.
pub fn remove_temp_file(remove_temp_files: bool, path: &Path) {
    if remove_temp_files && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("failed to delete temporary file {}: {e}", path.display());
        }
    }
}

/// Buffered writer, gzip-compressed when `gzip` is set.
pub fn open_writer(path: &Path, gzip: bool) -> Result<Box<dyn Write + Send>> {
    open_writer_with_capacity(path, gzip, 1 << 16)
}

pub fn open_writer_with_capacity(
    path: &Path,
    gzip: bool,
    capacity: usize,
) -> Result<Box<dyn Write + Send>> {
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let buffered = BufWriter::with_capacity(capacity, file);
    if gzip {
        Ok(Box::new(GzEncoder::new(buffered, Compression::fast())))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Buffered line reader, transparently gunzipping when `gzip` is set.
pub fn open_reader(path: &Path, gzip: bool) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let inner: Box<dyn Read + Send> = if gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::with_capacity(1 << 16, inner)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn iteration_file_names_are_zero_padded() {
        let dir = Path::new("/tmp/work");
        assert_eq!(
            iter_file_num(dir, 3, "tmp.kmers", 7),
            PathBuf::from("/tmp/work/03.tmp.kmers.7")
        );
        assert_eq!(
            reads_file(dir, "sample_1", 0, "cor"),
            PathBuf::from("/tmp/work/sample_1.00.cor.fastq")
        );
    }

    #[test]
    fn gzip_writer_reader_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gz");
        {
            let mut w = open_writer(&path, true).unwrap();
            w.write_all(b"12\tfoo\n34\tbar\n").unwrap();
            w.flush().unwrap();
        }
        let reader = open_reader(&path, true).unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["12\tfoo", "34\tbar"]);
    }
}
