//! # GeoKNN Core
//!
//! Core library for the GeoKNN retrieval engine.
//!
//! This crate provides the fundamental data structures and algorithms:
//!
//! - [`EmbeddingStore`] - document id to fixed-dimension vector map
//! - [`SimilarityIndex`] - exact ([`FlatIndex`]) or approximate ([`HnswIndex`]) k-NN
//! - [`Metric`] - cosine, negative squared Euclidean, or inner product
//! - [`Signal`] - caller-supplied evidence with [`RecencyDecay`] weighting
//!
//! ## Example
//!
//! ```rust
//! use geoknn_core::{EmbeddingStore, HnswParams, IndexKind, Metric, SimilarityIndex};
//!
//! let store = EmbeddingStore::from_records(
//!     3,
//!     vec![(1u64, vec![1.0, 0.0, 0.0]), (2, vec![0.9, 0.1, 0.0]), (3, vec![0.0, 1.0, 0.0])],
//! ).unwrap();
//! let index = SimilarityIndex::build(
//!     &store, &store.ids(), IndexKind::Hnsw, Metric::Cosine, HnswParams::default(),
//! ).unwrap();
//!
//! // Neighbors of document 1, excluding itself
//! let anchor = store.get(1).unwrap();
//! let results = index.search(anchor, 2, &[1]).unwrap();
//! assert_eq!(results[0].id, 2);
//! ```

pub mod embedding;
pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;
pub mod metric;
pub mod signal;
pub mod vector;

/// SIMD-optimized vector kernels
///
/// - AVX2/FMA on x86_64
/// - NEON on ARM64/Apple Silicon
pub mod simd;

pub use embedding::{EmbeddingStore, EmbeddingStoreBuilder};
pub use error::{Error, Result};
pub use flat::FlatIndex;
pub use hnsw::{HnswGraph, HnswIndex, HnswParams};
pub use index::{rank_and_truncate, Candidate, IndexKind, SimilarityIndex};
pub use metric::Metric;
pub use signal::{RecencyDecay, Signal, SignalIndex};
