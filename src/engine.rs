use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::shard::PartitionShard;
use geoknn_core::vector::WeightedSum;
use geoknn_core::{rank_and_truncate, Candidate, Error, RecencyDecay, Result, Signal, SignalIndex};
use geoknn_rerank::{candidate_features, InferencePool};
use std::sync::Arc;

/// Runs `query` and `tf_query` against a shard snapshot. Holds no shard
/// state of its own.
pub struct QueryEngine {
    recency_boost: f32,
    decay: RecencyDecay,
    max_future_skew_secs: u64,
    pool: InferencePool,
    clock: Arc<dyn Clock>,
}

/// Query vector plus the raw candidates found for it
struct Retrieval {
    query: Vec<f32>,
    candidates: Vec<Candidate>,
}

impl QueryEngine {
    pub fn new(config: &ServiceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = if config.inference_workers == 0 {
            InferencePool::with_available_parallelism()?
        } else {
            InferencePool::new(config.inference_workers)?
        };
        Ok(Self {
            recency_boost: config.recency_boost,
            decay: config.decay(),
            max_future_skew_secs: config.max_future_skew_secs,
            pool,
            clock,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn inference_workers(&self) -> usize {
        self.pool.size()
    }

    fn validate(&self, k: usize, signals: &[Signal], now: u64) -> Result<()> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        signals
            .iter()
            .try_for_each(|s| s.validate(now, self.max_future_skew_secs))
    }

    /// The anchor's embedding, or failing that the weight-normalized sum of
    /// the signalled documents' embeddings. `None` when neither resolves.
    fn query_vector(&self, shard: &PartitionShard, anchor_id: u64, signals: &[Signal]) -> Option<Vec<f32>> {
        let store = shard.store();
        if let Some(v) = store.get(anchor_id) {
            return Some(v.to_vec());
        }
        let mut sum = WeightedSum::new(store.dimension());
        for signal in signals {
            if let Some(v) = store.get(signal.doc_id) {
                sum.add(v, signal.weight as f32);
            }
        }
        tracing::debug!(
            country = shard.country(),
            anchor_id,
            resolved = sum.count(),
            "anchor not in store, using signal centroid"
        );
        sum.finish()
    }

    fn retrieve(
        &self,
        shard: &PartitionShard,
        anchor_id: u64,
        k: usize,
        signals: &[Signal],
    ) -> Result<Option<Retrieval>> {
        let Some(query) = self.query_vector(shard, anchor_id, signals) else {
            return Ok(None);
        };
        let candidates = shard.index().search(&query, k, &[anchor_id])?;
        Ok(Some(Retrieval { query, candidates }))
    }

    /// Nearest neighbors of the anchor, with fresh signalled documents
    /// boosted by `recency_boost * weight * 0.5^(age / half_life)`.
    pub fn query(&self, shard: &PartitionShard, anchor_id: u64, k: usize, signals: &[Signal]) -> Result<Vec<Candidate>> {
        let now = self.now();
        self.validate(k, signals, now)?;
        let Some(Retrieval { mut candidates, .. }) = self.retrieve(shard, anchor_id, k, signals)? else {
            return Ok(Vec::new());
        };

        let latest = SignalIndex::new(signals);
        if !latest.is_empty() {
            for candidate in candidates.iter_mut() {
                if let Some(signal) = latest.get(candidate.id) {
                    let factor = self.decay.factor(signal.age_secs(now));
                    candidate.score += self.recency_boost * signal.weight as f32 * factor;
                }
            }
        }
        rank_and_truncate(&mut candidates, k);
        Ok(candidates)
    }

    /// Nearest neighbors of the anchor, reordered by the named model.
    ///
    /// The model is resolved before any search, so an unknown model fails
    /// without touching the index or invoking a scorer.
    pub fn tf_query(
        &self,
        shard: &PartitionShard,
        anchor_id: u64,
        k: usize,
        signals: &[Signal],
        model: &str,
    ) -> Result<Vec<Candidate>> {
        let now = self.now();
        self.validate(k, signals, now)?;
        let scorer = shard.models().get(model)?;
        let Some(Retrieval { query, candidates }) = self.retrieve(shard, anchor_id, k, signals)? else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let latest = SignalIndex::new(signals);
        let store = shard.store();
        let (ids, features): (Vec<u64>, Vec<Vec<f32>>) = candidates
            .iter()
            .filter_map(|c| {
                store
                    .get(c.id)
                    .map(|embedding| (c.id, candidate_features(embedding, c.score, latest.get(c.id), now)))
            })
            .unzip();

        let scores = self.pool.score(scorer, query, features)?;
        let mut reranked: Vec<Candidate> = ids
            .into_iter()
            .zip(scores)
            .map(|(id, score)| Candidate::new(id, score))
            .collect();
        rank_and_truncate(&mut reranked, k);
        tracing::debug!(
            country = shard.country(),
            model,
            anchor_id,
            results = reranked.len(),
            "reranked candidates"
        );
        Ok(reranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use geoknn_core::{EmbeddingStore, HnswParams, IndexKind, Metric, SimilarityIndex};
    use geoknn_rerank::{PassthroughScorer, Scorer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: u64 = 1_600_000_000;

    /// Documents on a line: id i sits at x = i
    fn line_shard() -> PartitionShard {
        let store = EmbeddingStore::from_records(2, (1..=10u64).map(|i| (i, [i as f32, 1.0]))).unwrap();
        let index =
            SimilarityIndex::build(&store, &store.ids(), IndexKind::Flat, Metric::Euclidean, HnswParams::default())
                .unwrap();
        PartitionShard::new("FR", store, index)
    }

    fn engine(config: ServiceConfig) -> QueryEngine {
        QueryEngine::new(&config, Arc::new(FixedClock::new(NOW))).unwrap()
    }

    fn ids(results: &[Candidate]) -> Vec<u64> {
        results.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_query_excludes_anchor() {
        let engine = engine(ServiceConfig::default());
        let results = engine.query(&line_shard(), 5, 4, &[]).unwrap();
        assert_eq!(results.len(), 4);
        assert!(!ids(&results).contains(&5));
        // 4 and 6 tie at distance 1; lower id first
        assert_eq!(&ids(&results)[..2], &[4, 6]);
    }

    #[test]
    fn test_zero_k_rejected() {
        let engine = engine(ServiceConfig::default());
        assert!(matches!(
            engine.query(&line_shard(), 5, 0, &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_future_signal_rejected() {
        let engine = engine(ServiceConfig::default());
        let signals = [Signal::new(3, 0, NOW + 2 * 86_400, 1)];
        assert!(matches!(
            engine.query(&line_shard(), 5, 3, &signals),
            Err(Error::InvalidArgument(_))
        ));
        let within_skew = [Signal::new(3, 0, NOW + 60, 1)];
        assert!(engine.query(&line_shard(), 5, 3, &within_skew).is_ok());
    }

    #[test]
    fn test_recent_signal_boosts_candidate() {
        let engine = engine(ServiceConfig {
            recency_boost: 1.0,
            ..ServiceConfig::default()
        });
        // Document 8 is at squared distance 9 from 5, behind 4 and 6
        let signals = [Signal::new(8, 0, NOW, 20)];
        let results = engine.query(&line_shard(), 5, 9, &signals).unwrap();
        assert_eq!(results[0].id, 8);
        assert!((results[0].score - (-9.0 + 20.0)).abs() < 1e-4);
    }

    #[test]
    fn test_old_signal_decays() {
        let engine = engine(ServiceConfig {
            recency_boost: 1.0,
            recency_half_life_secs: 100.0,
            ..ServiceConfig::default()
        });
        let signals = [Signal::new(7, 0, NOW - 1_000, 20)];
        let results = engine.query(&line_shard(), 5, 5, &signals).unwrap();
        let seven = results.iter().find(|c| c.id == 7).unwrap();
        let expected = -4.0 + 20.0 * 0.5f32.powi(10);
        assert!((seven.score - expected).abs() < 1e-4);
        assert_eq!(results[0].id, 4);
    }

    #[test]
    fn test_unknown_anchor_uses_signal_centroid() {
        let engine = engine(ServiceConfig::default());
        // Centroid of x=2 (w=1) and x=8 (w=3) is x=6.5
        let signals = [Signal::new(2, 0, NOW, 1), Signal::new(8, 0, NOW, 3)];
        let results = engine.query(&line_shard(), 999, 2, &signals).unwrap();
        assert_eq!(results.len(), 2);
        assert!(ids(&results).iter().all(|id| [6, 7].contains(id)));
    }

    #[test]
    fn test_unknown_anchor_without_signals_is_empty() {
        let engine = engine(ServiceConfig::default());
        assert!(engine.query(&line_shard(), 999, 3, &[]).unwrap().is_empty());
        let unresolved = [Signal::new(500, 0, NOW, 1)];
        assert!(engine.query(&line_shard(), 999, 3, &unresolved).unwrap().is_empty());
    }

    struct CountingScorer {
        calls: Arc<AtomicUsize>,
    }

    impl Scorer for CountingScorer {
        fn score(&self, _anchor: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Prefer the farthest candidates: negate the raw similarity
            PassthroughScorer
                .score(&[], candidates)
                .map(|s| s.into_iter().map(|x| -x).collect())
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_tf_query_reorders_same_candidates() {
        let engine = engine(ServiceConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let shard = line_shard().with_models(
            &geoknn_rerank::ModelRegistry::new("FR").with_model("tf", Arc::new(CountingScorer { calls: calls.clone() })),
        );

        let plain = engine.query(&shard, 5, 4, &[]).unwrap();
        let reranked = engine.tf_query(&shard, 5, 4, &[], "tf").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut a = ids(&plain);
        let mut b = ids(&reranked);
        assert_ne!(a, b);
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert!(reranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_tf_query_unknown_model_invokes_nothing() {
        let engine = engine(ServiceConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let shard = line_shard().with_models(
            &geoknn_rerank::ModelRegistry::new("FR").with_model("tf", Arc::new(CountingScorer { calls: calls.clone() })),
        );
        assert!(matches!(
            engine.tf_query(&shard, 5, 4, &[], "other"),
            Err(Error::ModelNotLoaded { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.pool.jobs_started(), 0);
    }
}
