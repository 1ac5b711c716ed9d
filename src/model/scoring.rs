//! Scoring adapter: length check in front of an opaque model

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Ordered feature values for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Model output for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// -1 = anomaly, 1 = normal for the isolation forest
    pub label: i64,
    pub score: Option<f32>,
}

impl InferenceResult {
    pub fn is_anomaly(&self) -> bool {
        self.label < 0
    }
}

/// Trait for scoring backends (ONNX Runtime, test stubs, ...)
///
/// Implementations receive vectors that already passed the length check.
pub trait ScoringModel: Send + Sync {
    fn predict(&self, features: &[f32]) -> Result<InferenceResult, ScoringError>;

    /// Short human-readable description for logs
    fn describe(&self) -> String {
        "scoring model".to_string()
    }
}

/// Loaded model plus the dimensionality it was trained on.
///
/// Immutable after construction and shared across request tasks.
pub struct ScoringAdapter {
    model: Box<dyn ScoringModel>,
    dimensions: usize,
}

impl ScoringAdapter {
    pub fn new(model: Box<dyn ScoringModel>, dimensions: usize) -> Self {
        Self { model, dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn describe(&self) -> String {
        self.model.describe()
    }

    pub fn score(&self, vector: &FeatureVector) -> Result<InferenceResult, ScoringError> {
        let actual = vector.as_slice().len();
        if actual != self.dimensions {
            return Err(ScoringError::InvalidInput {
                expected: self.dimensions,
                actual,
            });
        }
        self.model.predict(vector.as_slice())
    }
}

impl std::fmt::Debug for ScoringAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringAdapter")
            .field("model", &self.model.describe())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
