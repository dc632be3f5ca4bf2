//! Storage layer for GeoKNN.
//!
//! Embedding directories hold bincode chunk files (optionally gzip
//! compressed); index directories hold a `metadata.json` and a checksummed
//! `graph.bin`. Everything is written atomically and validated on load.

pub mod format;
pub mod loader;
pub mod writer;

pub use format::{EmbeddingChunk, IndexMetadata};
pub use loader::{load_embeddings, load_index, read_metadata};
pub use writer::{build_index_dir, write_chunk, write_embeddings, write_index, ChunkCompression};
