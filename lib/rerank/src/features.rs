//! Feature vectors handed to scoring models.
//!
//! Anchor features are the query vector itself. Each candidate gets its
//! embedding followed by [`SIGNAL_FEATURES`] trailing values:
//!
//! | offset from end | feature |
//! |---|---|
//! | 4 | raw similarity score |
//! | 3 | 1.0 if a signal matched the candidate, else 0.0 |
//! | 2 | age of the most recent matching signal in days |
//! | 1 | weight of that signal |

use geoknn_core::Signal;

pub const SIGNAL_FEATURES: usize = 4;

pub fn candidate_features(embedding: &[f32], raw_score: f32, signal: Option<&Signal>, now: u64) -> Vec<f32> {
    let mut features = Vec::with_capacity(embedding.len() + SIGNAL_FEATURES);
    features.extend_from_slice(embedding);
    features.push(raw_score);
    match signal {
        Some(s) => {
            features.push(1.0);
            features.push(s.age_days(now));
            features.push(s.weight as f32);
        }
        None => features.extend_from_slice(&[0.0, 0.0, 0.0]),
    }
    features
}

/// Raw similarity stored in a candidate feature vector
#[inline]
pub fn raw_score(features: &[f32]) -> Option<f32> {
    features
        .len()
        .checked_sub(SIGNAL_FEATURES)
        .map(|i| features[i])
}

/// Network input width for an embedding dimension: anchor plus candidate
#[inline]
pub fn model_input_dim(embedding_dim: usize) -> usize {
    2 * embedding_dim + SIGNAL_FEATURES
}
