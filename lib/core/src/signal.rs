//! Caller-supplied query signals and the recency weighting applied to them.
//!
//! A signal is a piece of evidence sent with a query: a document the caller
//! interacted with, the content hash it saw, when, and how strongly.

use crate::{Error, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal {
    pub doc_id: u64,
    pub content_hash: u64,
    /// Unix epoch seconds
    pub timestamp: u64,
    pub weight: u32,
}

impl Signal {
    pub fn new(doc_id: u64, content_hash: u64, timestamp: u64, weight: u32) -> Self {
        Self {
            doc_id,
            content_hash,
            timestamp,
            weight,
        }
    }

    /// Seconds elapsed since the signal, zero for timestamps in the future
    #[inline]
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    #[inline]
    pub fn age_days(&self, now: u64) -> f32 {
        (self.age_secs(now) as f64 / SECS_PER_DAY) as f32
    }

    /// Reject timestamps further in the future than the allowed clock skew
    pub fn validate(&self, now: u64, max_future_skew_secs: u64) -> Result<()> {
        if self.timestamp > now.saturating_add(max_future_skew_secs) {
            return Err(Error::InvalidArgument(format!(
                "signal for document {} has timestamp {} in the future (now {})",
                self.doc_id, self.timestamp, now
            )));
        }
        Ok(())
    }

    /// Ordering used to pick the representative signal of a document:
    /// newest first, then heavier, then by content hash
    #[inline]
    fn supersedes(&self, other: &Signal) -> bool {
        (self.timestamp, self.weight, self.content_hash) > (other.timestamp, other.weight, other.content_hash)
    }
}

impl From<(u64, u64, u64, u32)> for Signal {
    fn from((doc_id, content_hash, timestamp, weight): (u64, u64, u64, u32)) -> Self {
        Signal::new(doc_id, content_hash, timestamp, weight)
    }
}

/// Exponential decay with a configurable half-life
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyDecay {
    pub half_life_secs: f64,
}

impl RecencyDecay {
    pub fn new(half_life_secs: f64) -> Self {
        Self { half_life_secs }
    }

    /// `0.5^(age / half_life)`, in `(0, 1]`. A non-positive half-life only
    /// credits signals with zero age.
    pub fn factor(&self, age_secs: u64) -> f32 {
        if self.half_life_secs <= 0.0 {
            return if age_secs == 0 { 1.0 } else { 0.0 };
        }
        0.5f64.powf(age_secs as f64 / self.half_life_secs) as f32
    }
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self::new(7.0 * SECS_PER_DAY)
    }
}

/// Most recent signal per document
#[derive(Debug, Default)]
pub struct SignalIndex {
    latest: AHashMap<u64, Signal>,
}

impl SignalIndex {
    pub fn new(signals: &[Signal]) -> Self {
        let mut latest: AHashMap<u64, Signal> = AHashMap::with_capacity(signals.len());
        for signal in signals {
            latest
                .entry(signal.doc_id)
                .and_modify(|current| {
                    if signal.supersedes(current) {
                        *current = *signal;
                    }
                })
                .or_insert(*signal);
        }
        Self { latest }
    }

    #[inline]
    pub fn get(&self, doc_id: u64) -> Option<&Signal> {
        self.latest.get(&doc_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_halves() {
        let decay = RecencyDecay::new(100.0);
        assert!((decay.factor(0) - 1.0).abs() < 1e-6);
        assert!((decay.factor(100) - 0.5).abs() < 1e-6);
        assert!((decay.factor(200) - 0.25).abs() < 1e-6);
        assert!(decay.factor(10) > decay.factor(20));
    }

    #[test]
    fn test_zero_half_life() {
        let decay = RecencyDecay::new(0.0);
        assert_eq!(decay.factor(0), 1.0);
        assert_eq!(decay.factor(1), 0.0);
    }

    #[test]
    fn test_signal_index_keeps_latest() {
        let signals = vec![
            Signal::new(1, 10, 100, 1),
            Signal::new(1, 11, 300, 1),
            Signal::new(1, 12, 200, 9),
            Signal::new(2, 20, 50, 4),
        ];
        let index = SignalIndex::new(&signals);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1).unwrap().timestamp, 300);
        assert_eq!(index.get(2).unwrap().weight, 4);
        assert!(index.get(3).is_none());
    }

    #[test]
    fn test_validate_future_timestamp() {
        let s = Signal::new(1, 0, 1_000, 1);
        assert!(s.validate(1_000, 0).is_ok());
        assert!(s.validate(900, 100).is_ok());
        assert!(matches!(s.validate(900, 50), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_age() {
        let s = Signal::from((782, 439154173303199114, 1580637528, 2));
        assert_eq!(s.age_secs(1580637528 + 86_400), 86_400);
        assert!((s.age_days(1580637528 + 86_400) - 1.0).abs() < 1e-6);
        assert_eq!(s.age_secs(0), 0);
    }
}
