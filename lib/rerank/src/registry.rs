use crate::model::ModelLoader;
use crate::scorer::Scorer;
use ahash::AHashMap;
use geoknn_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Named scoring models of one country.
///
/// Registries are values: adding a model produces a new registry and
/// leaves the original untouched, so a shard can publish the new one with
/// a single pointer swap.
#[derive(Clone)]
pub struct ModelRegistry {
    country: String,
    models: AHashMap<String, Arc<dyn Scorer>>,
}

impl ModelRegistry {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            models: AHashMap::new(),
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    /// Copy of this registry with `scorer` registered under `name`,
    /// replacing any model of the same name
    pub fn with_model(&self, name: impl Into<String>, scorer: Arc<dyn Scorer>) -> Self {
        let mut next = self.clone();
        next.models.insert(name.into(), scorer);
        next
    }

    /// Load a model file through `loader` and register it. On failure no
    /// registry changes.
    pub fn load(&self, name: &str, path: &Path, loader: &dyn ModelLoader) -> Result<Self> {
        let scorer = loader.load(path)?;
        tracing::info!(
            country = %self.country,
            model = name,
            kind = scorer.kind(),
            path = %path.display(),
            "loaded model"
        );
        Ok(self.with_model(name, scorer))
    }

    /// Same models under another country's name
    pub fn rebind(&self, country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            models: self.models.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Scorer>> {
        self.models.get(name).cloned().ok_or_else(|| Error::ModelNotLoaded {
            country: self.country.clone(),
            model: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Registered model names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Score directly on the calling thread
    pub fn score(&self, name: &str, anchor: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
        self.get(name)?.score(anchor, candidates)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("country", &self.country)
            .field("models", &self.names())
            .finish()
    }
}
