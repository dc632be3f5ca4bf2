//! Helpers over raw `f32` slices used by the store, the indices and the
//! query engine.

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
#[inline]
pub fn normalize(v: &mut [f32]) {
    let norm = crate::simd::norm(v);
    if norm > f32::EPSILON {
        let inv = 1.0 / norm;
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

/// Normalized copy of `v`
#[inline]
#[must_use]
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

/// True when every component is finite
#[inline]
pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Running weighted sum of vectors of a fixed dimension.
///
/// Used to synthesize a query vector from several embeddings. Zero-weight
/// contributions are still counted so that a set of all-zero weights can
/// fall back to the plain mean.
#[derive(Debug, Clone)]
pub struct WeightedSum {
    weighted: Vec<f32>,
    plain: Vec<f32>,
    total_weight: f64,
    count: usize,
}

impl WeightedSum {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            weighted: vec![0.0; dim],
            plain: vec![0.0; dim],
            total_weight: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, v: &[f32], weight: f32) {
        debug_assert_eq!(v.len(), self.weighted.len());
        for ((w, p), x) in self.weighted.iter_mut().zip(self.plain.iter_mut()).zip(v) {
            *w += weight * x;
            *p += x;
        }
        self.total_weight += f64::from(weight);
        self.count += 1;
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Weight-normalized sum, the plain mean when all weights were zero,
    /// or `None` if nothing was added.
    pub fn finish(self) -> Option<Vec<f32>> {
        if self.count == 0 {
            return None;
        }
        if self.total_weight > 0.0 {
            let inv = (1.0 / self.total_weight) as f32;
            Some(self.weighted.into_iter().map(|x| x * inv).collect())
        } else {
            let inv = 1.0 / self.count as f32;
            Some(self.plain.into_iter().map(|x| x * inv).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_weighted_sum() {
        let mut sum = WeightedSum::new(2);
        sum.add(&[1.0, 0.0], 3.0);
        sum.add(&[0.0, 1.0], 1.0);
        let v = sum.finish().unwrap();
        assert!((v[0] - 0.75).abs() < 1e-6);
        assert!((v[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_sum_zero_weights_falls_back_to_mean() {
        let mut sum = WeightedSum::new(2);
        sum.add(&[2.0, 0.0], 0.0);
        sum.add(&[0.0, 2.0], 0.0);
        assert_eq!(sum.finish().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_weighted_sum_empty() {
        assert!(WeightedSum::new(4).finish().is_none());
    }

    #[test]
    fn test_is_finite() {
        assert!(is_finite(&[1.0, -2.0]));
        assert!(!is_finite(&[1.0, f32::NAN]));
    }
}
