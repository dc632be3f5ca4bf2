//! # GeoKNN
//!
//! Per-country nearest-neighbor retrieval over precomputed document
//! embeddings, with optional learned reranking.
//!
//! Each country is served from an immutable shard holding its embedding
//! store, similarity index and scoring models. Reloading a country swaps the
//! whole shard atomically; queries already running keep the snapshot they
//! started with.
//!
//! ## Quick Start
//!
//! ### As a CLI
//!
//! ```bash
//! geoknn build --embeddings data/FR/embeddings --index data/FR/index --kind hnsw
//! geoknn query --country FR --index data/FR/index --embeddings data/FR/embeddings --anchor 782 -k 10
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use geoknn::prelude::*;
//!
//! let service = KnnService::new(ServiceConfig::default()).unwrap();
//! service.load_country("FR", "data/FR/index", "data/FR/embeddings").unwrap();
//! service.load_model("FR", "tf", "data/FR/tf.json").unwrap();
//!
//! let signals = [Signal::from((782, 439154173303199114, 1580637528, 2))];
//! let neighbors = service.query("FR", 782, 10, &signals).unwrap();
//! let reranked = service.tf_query("FR", 782, 10, &signals, "tf").unwrap();
//! ```
//!
//! ## Crate Structure
//!
//! - `geoknn-core` - embedding store, flat and HNSW indices, metrics, signals
//! - `geoknn-storage` - on-disk embedding chunks and index directories
//! - `geoknn-rerank` - scoring models, model registry, inference pool

pub mod clock;
pub mod config;
pub mod engine;
pub mod registry;
pub mod service;
pub mod shard;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ServiceConfig;
pub use registry::ShardRegistry;
pub use service::{KnnService, ServiceStats};
pub use shard::PartitionShard;

// Re-export core types
pub use geoknn_core::{
    Candidate, EmbeddingStore, Error, HnswParams, IndexKind, Metric, RecencyDecay, Result, Signal,
    SimilarityIndex,
};

// Re-export reranking
pub use geoknn_rerank::{FeedForwardModel, JsonModelLoader, ModelLoader, PassthroughScorer, Scorer};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Clock, Error, HnswParams, IndexKind, KnnService, Metric, ModelLoader, Result, Scorer, ServiceConfig, Signal,
    };
}
