use crate::features;
use geoknn_core::{Error, Result};

/// Scores candidates against an anchor.
///
/// Implementations return exactly one finite value per candidate, higher
/// meaning more relevant. They must not panic on bad input; any panic that
/// does escape is caught by the inference pool and reported as an
/// inference error.
pub trait Scorer: Send + Sync {
    fn score(&self, anchor: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>>;

    /// Short label for logs
    fn kind(&self) -> &'static str;
}

/// Returns each candidate's raw similarity feature unchanged, keeping the
/// index order. Useful as a baseline model and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughScorer;

impl Scorer for PassthroughScorer {
    fn score(&self, _anchor: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
        candidates
            .iter()
            .map(|c| {
                features::raw_score(c).ok_or_else(|| {
                    Error::Inference(format!("candidate has {} features, too few for a raw score", c.len()))
                })
            })
            .collect()
    }

    fn kind(&self) -> &'static str {
        "passthrough"
    }
}
