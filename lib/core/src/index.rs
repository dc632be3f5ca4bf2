use crate::flat::FlatIndex;
use crate::hnsw::{HnswIndex, HnswParams};
use crate::{EmbeddingStore, Error, Metric, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// A document with its similarity score. Higher is more similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u64,
    pub score: f32,
}

impl Candidate {
    #[inline]
    pub fn new(id: u64, score: f32) -> Self {
        Self { id, score }
    }
}

impl From<Candidate> for (u64, f32) {
    fn from(c: Candidate) -> Self {
        (c.id, c.score)
    }
}

/// Result order: score descending, then id ascending
#[inline]
pub fn by_rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_unstable_by(by_rank);
}

/// Rank, drop duplicate ids (first occurrence wins) and cut to `k`
pub fn rank_and_truncate(candidates: &mut Vec<Candidate>, k: usize) {
    rank(candidates);
    let mut seen = ahash::AHashSet::with_capacity(candidates.len());
    candidates.retain(|c| seen.insert(c.id));
    candidates.truncate(k);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Flat,
    #[default]
    Hnsw,
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "flat" | "exact" => Ok(IndexKind::Flat),
            "hnsw" => Ok(IndexKind::Hnsw),
            _ => Err(Error::InvalidArgument(format!("unknown index kind '{}'", value))),
        }
    }
}

/// Per-country k-NN structure, exact or graph based
pub enum SimilarityIndex {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
}

impl SimilarityIndex {
    /// Build an index over `ids`, every one of which must be in `store`
    pub fn build(
        store: &EmbeddingStore,
        ids: &[u64],
        kind: IndexKind,
        metric: Metric,
        params: HnswParams,
    ) -> Result<Self> {
        match kind {
            IndexKind::Flat => FlatIndex::build(store, ids, metric).map(SimilarityIndex::Flat),
            IndexKind::Hnsw => HnswIndex::build(store, ids, metric, params).map(SimilarityIndex::Hnsw),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            SimilarityIndex::Flat(_) => IndexKind::Flat,
            SimilarityIndex::Hnsw(_) => IndexKind::Hnsw,
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            SimilarityIndex::Flat(i) => i.metric(),
            SimilarityIndex::Hnsw(i) => i.metric(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            SimilarityIndex::Flat(i) => i.dimension(),
            SimilarityIndex::Hnsw(i) => i.dimension(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SimilarityIndex::Flat(i) => i.len(),
            SimilarityIndex::Hnsw(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed document ids in node order
    pub fn ids(&self) -> &[u64] {
        match self {
            SimilarityIndex::Flat(i) => i.ids(),
            SimilarityIndex::Hnsw(i) => i.ids(),
        }
    }

    /// Top `k` documents most similar to `query`, never including an id in
    /// `exclude`. Sorted by score descending, ties by ascending id. Every
    /// score is finite; documents whose similarity overflows are left out.
    pub fn search(&self, query: &[f32], k: usize, exclude: &[u64]) -> Result<Vec<Candidate>> {
        if query.len() != self.dimension() {
            return Err(Error::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension()
            )));
        }
        if !crate::vector::is_finite(query) {
            return Err(Error::InvalidArgument("query vector has non-finite components".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let prepared = self.metric().prepare(query);
        let results = match self {
            SimilarityIndex::Flat(index) => index.search(&prepared, k, exclude),
            SimilarityIndex::Hnsw(index) => {
                let want = k + exclude.len();
                let mut found: Vec<Candidate> = index
                    .search(&prepared, want, index.params().ef_search)
                    .into_iter()
                    .map(|(node, dist)| Candidate::new(index.doc_id(node), -dist))
                    .filter(|c| c.score.is_finite() && !exclude.contains(&c.id))
                    .collect();
                rank_and_truncate(&mut found, k);
                found
            }
        };
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_store() -> EmbeddingStore {
        let mut records = Vec::new();
        for x in 0..10u64 {
            for y in 0..10u64 {
                records.push((x * 10 + y, vec![x as f32, y as f32]));
            }
        }
        EmbeddingStore::from_records(2, records).unwrap()
    }

    #[test]
    fn test_rank_order() {
        let mut c = vec![
            Candidate::new(5, 0.5),
            Candidate::new(2, 0.9),
            Candidate::new(1, 0.5),
            Candidate::new(2, 0.1),
        ];
        rank_and_truncate(&mut c, 10);
        assert_eq!(
            c.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![2, 1, 5]
        );
    }

    #[test]
    fn test_flat_and_hnsw_agree_on_small_grid() {
        let store = grid_store();
        let ids = store.ids();
        let flat = SimilarityIndex::build(&store, &ids, IndexKind::Flat, Metric::Euclidean, HnswParams::default())
            .unwrap();
        let hnsw = SimilarityIndex::build(&store, &ids, IndexKind::Hnsw, Metric::Euclidean, HnswParams::default())
            .unwrap();

        let query = [4.2, 6.9];
        let a = flat.search(&query, 5, &[]).unwrap();
        let b = hnsw.search(&query, 5, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_search_excludes_anchor() {
        let store = grid_store();
        let ids = store.ids();
        for kind in [IndexKind::Flat, IndexKind::Hnsw] {
            let index = SimilarityIndex::build(&store, &ids, kind, Metric::Cosine, HnswParams::default()).unwrap();
            let anchor = store.get(55).unwrap().to_vec();
            let results = index.search(&anchor, 10, &[55]).unwrap();
            assert_eq!(results.len(), 10);
            assert!(results.iter().all(|c| c.id != 55));
        }
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        let store = grid_store();
        let index =
            SimilarityIndex::build(&store, &store.ids(), IndexKind::Flat, Metric::Cosine, HnswParams::default())
                .unwrap();
        assert!(matches!(
            index.search(&[1.0, 2.0, 3.0], 3, &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_repeated_queries_are_identical() {
        let store = grid_store();
        let index =
            SimilarityIndex::build(&store, &store.ids(), IndexKind::Hnsw, Metric::Cosine, HnswParams::default())
                .unwrap();
        let first = index.search(&[3.0, 1.0], 7, &[31]).unwrap();
        for _ in 0..5 {
            assert_eq!(index.search(&[3.0, 1.0], 7, &[31]).unwrap(), first);
        }
    }

    #[test]
    fn test_overflowing_scores_are_dropped() {
        let store = EmbeddingStore::from_records(
            2,
            vec![(1u64, [3e38f32, 3e38]), (2, [1.0, 1.0]), (3, [2.0, 0.0])],
        )
        .unwrap();
        for kind in [IndexKind::Flat, IndexKind::Hnsw] {
            let index = SimilarityIndex::build(&store, &store.ids(), kind, Metric::Dot, HnswParams::default()).unwrap();
            let results = index.search(&[3e38, -3e38], 3, &[]).unwrap();
            assert_eq!(results, vec![Candidate::new(2, 0.0)], "{:?}", kind);
        }
    }

    #[test]
    fn test_build_rejects_unknown_id() {
        let store = grid_store();
        let result =
            SimilarityIndex::build(&store, &[1, 2, 1000], IndexKind::Flat, Metric::Cosine, HnswParams::default());
        assert!(matches!(result, Err(Error::IndexCorrupt(_))));
    }
}
