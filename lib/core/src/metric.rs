use crate::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Similarity metric of an index snapshot.
///
/// Every metric is expressed so that a higher score means "more similar":
/// cosine similarity, negative squared Euclidean distance, or raw inner
/// product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl Metric {
    /// Transform a stored vector into the form the index keeps in memory.
    /// Cosine vectors are normalized once so search is a plain dot product.
    pub fn prepare(&self, v: &[f32]) -> Vec<f32> {
        match self {
            Metric::Cosine => crate::vector::normalized(v),
            Metric::Euclidean | Metric::Dot => v.to_vec(),
        }
    }

    /// Similarity between a prepared query and a prepared stored vector
    #[inline]
    pub fn similarity(&self, query: &[f32], stored: &[f32]) -> f32 {
        match self {
            Metric::Cosine | Metric::Dot => crate::simd::dot(query, stored),
            Metric::Euclidean => -crate::simd::squared_l2(query, stored),
        }
    }

    /// Distance used internally by the graph search, smaller is closer
    #[inline]
    pub fn distance(&self, query: &[f32], stored: &[f32]) -> f32 {
        -self.similarity(query, stored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cosine" | "angular" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "dotproduct" | "inner_product" => Ok(Metric::Dot),
            _ => Err(Error::InvalidArgument(format!("unknown metric '{}'", value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_is_more_similar() {
        let q = [1.0, 0.0];
        let near = [0.9, 0.1];
        let far = [-1.0, 0.0];
        for metric in [Metric::Cosine, Metric::Euclidean, Metric::Dot] {
            let q = metric.prepare(&q);
            let near = metric.prepare(&near);
            let far = metric.prepare(&far);
            assert!(
                metric.similarity(&q, &near) > metric.similarity(&q, &far),
                "{}",
                metric
            );
        }
    }

    #[test]
    fn test_euclidean_is_negative_squared() {
        let s = Metric::Euclidean.similarity(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((s + 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Angular".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("euclidean".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!("dotproduct".parse::<Metric>().unwrap(), Metric::Dot);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
