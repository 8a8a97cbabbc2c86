//! # SeqForge - Read Correction and Graph Simplification Engine
//!
//! High-performance building blocks for short-read DNA assembly:
//! k-mer spectrum error correction (Hamming-cluster consensus over a
//! blob-backed k-mer store) and iterative de Bruijn graph simplification
//! (tip clipping, bulge removal, erroneous connection removal, vertex
//! compression) with an observer protocol for structural graph mutations.

pub mod core;
pub mod correction;
pub mod distance;
pub mod graph;
pub mod simplify;
pub mod utils;

// Re-export commonly used types at crate level
pub use crate::core::blob::{Blob, BlobPos, PositionRead};
pub use crate::core::kmer::{KmerCount, KmerStat, K};
pub use crate::core::read::{ReadSink, ReadStream, SequencedRead};
pub use crate::correction::HammerEngine;
pub use crate::graph::{AssemblyGraph, EdgeId, VertexId};
pub use crate::utils::configuration::{PipelineConfig, PipelineError};

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate
pub type Error = anyhow::Error;
