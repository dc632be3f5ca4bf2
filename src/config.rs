use geoknn_core::{Error, RecencyDecay, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DAY_SECS: u64 = 86_400;

/// Runtime configuration of a [`KnnService`](crate::KnnService).
///
/// Every field has a default, so a JSON file only needs the keys it
/// changes:
///
/// ```json
/// { "recency_boost": 0.2, "inference_workers": 4 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Score added per unit of signal weight to a fresh matching candidate
    pub recency_boost: f32,
    pub recency_half_life_secs: f64,
    /// Signals further in the future than this are rejected
    pub max_future_skew_secs: u64,
    /// Inference threads; 0 means one per available core
    pub inference_workers: usize,
    /// Carry loaded models over when a country is reloaded
    pub retain_models_on_reload: bool,
    /// Shard that serves countries which are not loaded
    pub fallback_country: Option<String>,
    /// Overrides the search width stored with HNSW indices
    pub ef_search: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            recency_boost: 0.1,
            recency_half_life_secs: (7 * DAY_SECS) as f64,
            max_future_skew_secs: DAY_SECS,
            inference_workers: 0,
            retain_models_on_reload: true,
            fallback_country: None,
            ef_search: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_json(data: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_json::from_str(data).map_err(|e| Error::InvalidArgument(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.recency_boost.is_finite() {
            return Err(Error::InvalidArgument("recency_boost must be finite".into()));
        }
        if !self.recency_half_life_secs.is_finite() || self.recency_half_life_secs < 0.0 {
            return Err(Error::InvalidArgument(
                "recency_half_life_secs must be a non-negative number".into(),
            ));
        }
        if self.ef_search == Some(0) {
            return Err(Error::InvalidArgument("ef_search must be positive".into()));
        }
        if let Some(country) = &self.fallback_country {
            if country.is_empty() {
                return Err(Error::InvalidArgument("fallback_country must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn decay(&self) -> RecencyDecay {
        RecencyDecay::new(self.recency_half_life_secs)
    }
}
