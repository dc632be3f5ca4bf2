use crate::index::{rank, Candidate};
use crate::{EmbeddingStore, Error, Metric, Result};
use rayon::prelude::*;

/// Stores above this size are scanned in parallel
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// Exact brute-force index
pub struct FlatIndex {
    metric: Metric,
    dim: usize,
    ids: Vec<u64>,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn build(store: &EmbeddingStore, ids: &[u64], metric: Metric) -> Result<Self> {
        let dim = store.dimension();
        let mut seen = ahash::AHashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::IndexCorrupt(format!("duplicate document {} in index input", dup)));
        }

        let mut vectors = Vec::with_capacity(ids.len() * dim);
        for &id in ids {
            let v = store.get(id).ok_or_else(|| {
                Error::IndexCorrupt(format!("index references document {} absent from embeddings", id))
            })?;
            vectors.extend(metric.prepare(v));
        }
        tracing::debug!(documents = ids.len(), dim, %metric, "built flat index");
        Ok(Self {
            metric,
            dim,
            ids: ids.to_vec(),
            vectors,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[inline]
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// Exact top-k over a prepared query. Documents whose similarity
    /// overflows to a non-finite value are skipped.
    pub fn search(&self, query: &[f32], k: usize, exclude: &[u64]) -> Vec<Candidate> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let score = |(slot, &id): (usize, &u64)| -> Option<Candidate> {
            if exclude.contains(&id) {
                return None;
            }
            let start = slot * self.dim;
            let stored = &self.vectors[start..start + self.dim];
            let similarity = self.metric.similarity(query, stored);
            similarity.is_finite().then_some(Candidate::new(id, similarity))
        };

        let mut scored: Vec<Candidate> = if self.ids.len() >= PARALLEL_SCAN_THRESHOLD {
            self.ids.par_iter().enumerate().filter_map(score).collect()
        } else {
            self.ids.iter().enumerate().filter_map(score).collect()
        };

        if scored.len() > k {
            scored.select_nth_unstable_by(k, crate::index::by_rank);
            scored.truncate(k);
        }
        rank(&mut scored);
        scored
    }
}
