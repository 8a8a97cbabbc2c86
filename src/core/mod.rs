//! Core data structures shared by the correction and graph engines.

pub mod blob;
pub mod kmer;
pub mod read;

pub use blob::{Blob, BlobPos, PositionRead};
pub use kmer::{KmerCount, KmerStat, ValidKmerGenerator, K};
pub use read::{ReadSink, ReadStream, SequencedRead, VecReadStream, VecSink};
