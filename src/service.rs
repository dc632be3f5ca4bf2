use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::engine::QueryEngine;
use crate::registry::ShardRegistry;
use crate::shard::PartitionShard;
use geoknn_core::{Candidate, Error, Result, Signal};
use geoknn_rerank::{JsonModelLoader, ModelLoader};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters reported by [`KnnService::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub queries: u64,
    pub tf_queries: u64,
    pub failures: u64,
    pub countries: usize,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    tf_queries: AtomicU64,
    failures: AtomicU64,
}

/// Per-country nearest-neighbor service.
///
/// One instance is shared by all callers (`KnnService` is `Send + Sync`).
/// Loading replaces a country's data atomically; queries read whichever
/// snapshot was installed when they started.
pub struct KnnService {
    config: ServiceConfig,
    registry: ShardRegistry,
    engine: QueryEngine,
    loader: Arc<dyn ModelLoader>,
    counters: Counters,
}

impl KnnService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(JsonModelLoader), Arc::new(SystemClock))
    }

    /// Service with an injected model loader and clock
    pub fn with_parts(config: ServiceConfig, loader: Arc<dyn ModelLoader>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let engine = QueryEngine::new(&config, clock)?;
        tracing::info!(
            inference_workers = engine.inference_workers(),
            fallback_country = config.fallback_country.as_deref().unwrap_or("-"),
            "service ready"
        );
        Ok(Self {
            config,
            registry: ShardRegistry::new(),
            engine,
            loader,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Load (or reload) a country from its index and embedding directories.
    ///
    /// On failure the previously installed shard, if any, stays in place.
    pub fn load_country(
        &self,
        country: &str,
        index_dir: impl AsRef<Path>,
        embedding_dir: impl AsRef<Path>,
    ) -> Result<()> {
        let (index_dir, embedding_dir) = (index_dir.as_ref(), embedding_dir.as_ref());
        let started = Instant::now();
        tracing::info!(
            country,
            index_dir = %index_dir.display(),
            embedding_dir = %embedding_dir.display(),
            "loading country"
        );

        let result = self.registry.install(country, |previous| {
            let shard = PartitionShard::load(country, index_dir, embedding_dir, self.config.ef_search)?;
            Ok(match previous {
                Some(previous) if self.config.retain_models_on_reload => shard.with_models(previous.models()),
                _ => shard,
            })
        });

        match result {
            Ok(shard) => {
                tracing::info!(
                    country,
                    documents = shard.store().len(),
                    indexed = shard.index().len(),
                    dim = shard.store().dimension(),
                    models = shard.models().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "country loaded"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(country, error = %e, "country load failed");
                Err(e)
            }
        }
    }

    /// Attach a model to an already loaded country
    pub fn load_model(&self, country: &str, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let result = self
            .registry
            .update(country, |shard| shard.load_model(name, path, self.loader.as_ref()));
        if let Err(e) = &result {
            tracing::warn!(country, model = name, error = %e, "model load failed");
        }
        result.map(|_| ())
    }

    fn shard(&self, country: &str) -> Result<Arc<PartitionShard>> {
        if let Some(shard) = self.registry.get(country) {
            return Ok(shard);
        }
        if let Some(fallback) = self.config.fallback_country.as_deref() {
            if let Some(shard) = self.registry.get(fallback) {
                tracing::debug!(country, fallback, "serving from fallback country");
                return Ok(shard);
            }
        }
        Err(Error::CountryNotLoaded(country.to_string()))
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Up to `k` documents closest to `anchor_id`, as `(doc_id, score)`
    /// sorted by score descending
    pub fn query(&self, country: &str, anchor_id: u64, k: usize, signals: &[Signal]) -> Result<Vec<(u64, f32)>> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let result = self
            .shard(country)
            .and_then(|shard| self.engine.query(&shard, anchor_id, k, signals))
            .map(into_pairs);
        self.track(result)
    }

    /// Like [`query`](Self::query), with the candidates reordered by the
    /// named model
    pub fn tf_query(
        &self,
        country: &str,
        anchor_id: u64,
        k: usize,
        signals: &[Signal],
        model: &str,
    ) -> Result<Vec<(u64, f32)>> {
        self.counters.tf_queries.fetch_add(1, Ordering::Relaxed);
        let result = self
            .shard(country)
            .and_then(|shard| self.engine.tf_query(&shard, anchor_id, k, signals, model))
            .map(into_pairs);
        self.track(result)
    }

    /// Countries with a loaded shard, sorted
    pub fn countries(&self) -> Vec<String> {
        self.registry.countries()
    }

    pub fn embedding(&self, country: &str, doc_id: u64) -> Result<Option<Vec<f32>>> {
        let shard = self.shard(country)?;
        Ok(shard.store().get(doc_id).map(|v| v.to_vec()))
    }

    /// Every document with an embedding in `country`, ascending
    pub fn document_ids(&self, country: &str) -> Result<Vec<u64>> {
        Ok(self.shard(country)?.store().ids())
    }

    pub fn models(&self, country: &str) -> Result<Vec<String>> {
        Ok(self.shard(country)?.models().names())
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            tf_queries: self.counters.tf_queries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            countries: self.registry.len(),
        }
    }
}

fn into_pairs(candidates: Vec<Candidate>) -> Vec<(u64, f32)> {
    candidates.into_iter().map(Into::into).collect()
}
