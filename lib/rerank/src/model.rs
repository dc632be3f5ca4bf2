//! Learned feed-forward scoring model stored as JSON.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "input_dim": 6,
//!   "layers": [
//!     { "weights": [[...6 values...], [...]], "bias": [0.0, 0.0], "activation": "relu" },
//!     { "weights": [[1.0, -1.0]], "bias": [0.0] }
//!   ]
//! }
//! ```
//!
//! The network input is the anchor features followed by the candidate
//! features. The last layer has exactly one output: the candidate's score.

use crate::scorer::Scorer;
use geoknn_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const MODEL_FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    MODEL_FORMAT_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// Dense layer; `weights[o]` holds the input weights of output `o`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

impl Layer {
    fn forward(&self, input: &[f32], output: &mut Vec<f32>) {
        output.clear();
        output.extend(self.weights.iter().zip(&self.bias).map(|(row, b)| {
            let sum: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
            self.activation.apply(sum + b)
        }));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardModel {
    #[serde(default = "default_version")]
    pub format_version: u32,
    pub input_dim: usize,
    pub layers: Vec<Layer>,
}

impl FeedForwardModel {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let model: FeedForwardModel =
            serde_json::from_slice(data).map_err(|e| Error::ModelCorrupt(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data).map_err(|e| match e {
            Error::ModelCorrupt(msg) => Error::ModelCorrupt(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Shape and value checks so scoring never indexes out of bounds
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::ModelCorrupt(format!(
                "unsupported model format version {}",
                self.format_version
            )));
        }
        if self.input_dim == 0 {
            return Err(Error::ModelCorrupt("input_dim must be positive".into()));
        }
        if self.layers.is_empty() {
            return Err(Error::ModelCorrupt("model has no layers".into()));
        }

        let mut width = self.input_dim;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() {
                return Err(Error::ModelCorrupt(format!("layer {} has no outputs", i)));
            }
            if layer.bias.len() != layer.weights.len() {
                return Err(Error::ModelCorrupt(format!(
                    "layer {} has {} outputs but {} biases",
                    i,
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != width) {
                return Err(Error::ModelCorrupt(format!(
                    "layer {} row {} expects {} inputs, previous layer gives {}",
                    i,
                    row,
                    layer.weights[row].len(),
                    width
                )));
            }
            let finite = layer.weights.iter().flatten().chain(&layer.bias).all(|v| v.is_finite());
            if !finite {
                return Err(Error::ModelCorrupt(format!("layer {} has non-finite parameters", i)));
            }
            width = layer.weights.len();
        }
        if width != 1 {
            return Err(Error::ModelCorrupt(format!("final layer has {} outputs, expected 1", width)));
        }
        Ok(())
    }

    fn forward(&self, input: &[f32]) -> f32 {
        let mut current = input.to_vec();
        let mut next = Vec::new();
        for layer in &self.layers {
            layer.forward(&current, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        current[0]
    }
}

impl Scorer for FeedForwardModel {
    fn score(&self, anchor: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
        let mut input = Vec::with_capacity(self.input_dim);
        let mut scores = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            input.clear();
            input.extend_from_slice(anchor);
            input.extend_from_slice(candidate);
            if input.len() != self.input_dim {
                return Err(Error::Inference(format!(
                    "model expects {} inputs, candidate {} provides {}",
                    self.input_dim,
                    i,
                    input.len()
                )));
            }
            let score = self.forward(&input);
            if !score.is_finite() {
                return Err(Error::Inference(format!("model produced {} for candidate {}", score, i)));
            }
            scores.push(score);
        }
        Ok(scores)
    }

    fn kind(&self) -> &'static str {
        "feed-forward"
    }
}

/// Turns a model file into a scorer
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Scorer>>;
}

/// Loads [`FeedForwardModel`] JSON files
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelLoader;

impl ModelLoader for JsonModelLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Scorer>> {
        let model = FeedForwardModel::from_file(path)?;
        tracing::debug!(
            path = %path.display(),
            input_dim = model.input_dim,
            layers = model.layers.len(),
            "parsed feed-forward model"
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn linear_model() -> &'static str {
        // score = 2*a0 + c0 - c1 + 0.5
        r#"{
            "format_version": 1,
            "input_dim": 3,
            "layers": [
                { "weights": [[2.0, 1.0, -1.0]], "bias": [0.5] }
            ]
        }"#
    }

    #[test]
    fn test_linear_scores() {
        let model = FeedForwardModel::from_json(linear_model().as_bytes()).unwrap();
        let scores = model.score(&[1.0], &[vec![1.0, 0.0], vec![0.0, 3.0]]).unwrap();
        assert_eq!(scores, vec![3.5, -0.5]);
    }

    #[test]
    fn test_hidden_layer_relu() {
        let json = r#"{
            "input_dim": 2,
            "layers": [
                { "weights": [[1.0, 0.0], [0.0, 1.0]], "bias": [0.0, 0.0], "activation": "relu" },
                { "weights": [[1.0, 1.0]], "bias": [0.0] }
            ]
        }"#;
        let model = FeedForwardModel::from_json(json.as_bytes()).unwrap();
        assert_eq!(model.score(&[-2.0], &[vec![3.0]]).unwrap(), vec![3.0]);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let cases = [
            r#"{"input_dim": 2, "layers": []}"#,
            r#"{"input_dim": 2, "layers": [{"weights": [[1.0]], "bias": [0.0]}]}"#,
            r#"{"input_dim": 1, "layers": [{"weights": [[1.0]], "bias": []}]}"#,
            r#"{"input_dim": 1, "layers": [{"weights": [[1.0], [2.0]], "bias": [0.0, 0.0]}]}"#,
            r#"{"format_version": 7, "input_dim": 1, "layers": [{"weights": [[1.0]], "bias": [0.0]}]}"#,
            r#"{"input_dim": 1, "layers": [{"weights": [[1.0]], "bias": [0.0], "activation": "swish"}]}"#,
            "not json",
        ];
        for json in cases {
            assert!(
                matches!(FeedForwardModel::from_json(json.as_bytes()), Err(Error::ModelCorrupt(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_input_mismatch_is_inference_error() {
        let model = FeedForwardModel::from_json(linear_model().as_bytes()).unwrap();
        assert!(matches!(
            model.score(&[1.0, 2.0], &[vec![1.0, 0.0]]),
            Err(Error::Inference(_))
        ));
    }

    #[test]
    fn test_non_finite_output() {
        let json = r#"{"input_dim": 1, "layers": [{"weights": [[3.0e38]], "bias": [0.0]}]}"#;
        let model = FeedForwardModel::from_json(json.as_bytes()).unwrap();
        assert!(matches!(model.score(&[], &[vec![10.0]]), Err(Error::Inference(_))));
    }

    #[test]
    fn test_json_loader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tf.json");
        std::fs::write(&path, linear_model()).unwrap();
        let scorer = JsonModelLoader.load(&path).unwrap();
        assert_eq!(scorer.kind(), "feed-forward");

        assert!(matches!(
            JsonModelLoader.load(&dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(JsonModelLoader.load(&path), Err(Error::ModelCorrupt(_))));
    }
}
