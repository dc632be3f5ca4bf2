use chrono::{DateTime, Utc};
use geoknn_core::{EmbeddingStore, Result, SimilarityIndex};
use geoknn_rerank::{ModelLoader, ModelRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Everything loaded for one country: embeddings, index and models.
///
/// Shards are immutable. Attaching a model creates a new shard that shares
/// the store and index of the old one.
pub struct PartitionShard {
    country: String,
    store: Arc<EmbeddingStore>,
    index: Arc<SimilarityIndex>,
    models: ModelRegistry,
    loaded_at: DateTime<Utc>,
}

impl PartitionShard {
    pub fn new(country: impl Into<String>, store: EmbeddingStore, index: SimilarityIndex) -> Self {
        let country = country.into();
        Self {
            models: ModelRegistry::new(country.clone()),
            country,
            store: Arc::new(store),
            index: Arc::new(index),
            loaded_at: Utc::now(),
        }
    }

    /// Read an embedding directory and the index built over it
    pub fn load(country: &str, index_dir: &Path, embedding_dir: &Path, ef_search: Option<usize>) -> Result<Self> {
        let started = Instant::now();
        let store = geoknn_storage::load_embeddings(embedding_dir)?;
        let index = geoknn_storage::load_index(index_dir, &store, ef_search)?;
        tracing::debug!(
            country,
            documents = store.len(),
            indexed = index.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built shard"
        );
        Ok(Self::new(country, store, index))
    }

    /// This shard with `models` (rebound to this country) as its registry
    pub fn with_models(self, models: &ModelRegistry) -> Self {
        Self {
            models: models.rebind(self.country.clone()),
            ..self
        }
    }

    /// A new shard sharing this one's data, with one more model loaded
    pub fn load_model(&self, name: &str, path: &Path, loader: &dyn ModelLoader) -> Result<Self> {
        Ok(Self {
            country: self.country.clone(),
            store: self.store.clone(),
            index: self.index.clone(),
            models: self.models.load(name, path, loader)?,
            loaded_at: self.loaded_at,
        })
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl std::fmt::Debug for PartitionShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionShard")
            .field("country", &self.country)
            .field("documents", &self.store.len())
            .field("indexed", &self.index.len())
            .field("kind", &self.index.kind())
            .field("models", &self.models.names())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}
