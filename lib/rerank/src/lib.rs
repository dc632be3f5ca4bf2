//! # GeoKNN Rerank
//!
//! Learned reranking of nearest-neighbor candidates.
//!
//! - [`Scorer`] - capability implemented by every scoring model
//! - [`FeedForwardModel`] - dense network loaded from JSON
//! - [`ModelRegistry`] - named models of one country, copy-on-write
//! - [`InferencePool`] - fixed worker threads that run scorers
//!
//! Candidate feature layout is described in [`features`].

pub mod features;
pub mod model;
pub mod pool;
pub mod registry;
pub mod scorer;

pub use features::{candidate_features, SIGNAL_FEATURES};
pub use model::{Activation, FeedForwardModel, JsonModelLoader, Layer, ModelLoader};
pub use pool::InferencePool;
pub use registry::ModelRegistry;
pub use scorer::{PassthroughScorer, Scorer};
