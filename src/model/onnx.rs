//! Inference Engine - ONNX Runtime Integration
//!
//! Loads the isolation forest exported by skl2onnx and runs single-sample
//! predictions. Outputs follow the skl2onnx convention: output 0 is the
//! label tensor (int64, -1 anomaly / 1 normal), output 1 the score tensor.

use std::path::Path;

use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;
use parking_lot::Mutex;

use crate::error::ScoringError;
use super::scoring::{InferenceResult, ScoringModel};

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

/// Loaded ONNX session
pub struct OnnxModel {
    // `Session::run` needs `&mut`, so concurrent requests serialize here.
    session: Mutex<Session>,
    model_path: String,
    input_name: String,
    label_output: String,
    score_output: Option<String>,
}

impl OnnxModel {
    /// Load ONNX model from file
    pub fn load(model_path: &str) -> Result<Self, ScoringError> {
        tracing::info!("Loading ONNX model from: {}", model_path);

        if !Path::new(model_path).exists() {
            return Err(ScoringError::Model(format!("Model not found: {}", model_path)));
        }

        let session = Session::builder()
            .map_err(|e| ScoringError::Model(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ScoringError::Model(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ScoringError::Model(format!("Failed to load model: {}", e)))?;

        Self::from_session(session, model_path)
    }

    fn from_session(session: Session, model_path: &str) -> Result<Self, ScoringError> {
        let input_name = session.inputs.first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ScoringError::Model("Model declares no inputs".to_string()))?;

        let label_output = session.outputs.first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ScoringError::Model("Model declares no outputs".to_string()))?;

        let score_output = session.outputs.get(1).map(|o| o.name.clone());

        tracing::info!(
            input = %input_name,
            label = %label_output,
            score = ?score_output,
            "ONNX model loaded successfully"
        );

        Ok(Self {
            session: Mutex::new(session),
            model_path: model_path.to_string(),
            input_name,
            label_output,
            score_output,
        })
    }
}

impl ScoringModel for OnnxModel {
    fn predict(&self, features: &[f32]) -> Result<InferenceResult, ScoringError> {
        let input_array = Array2::<f32>::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| ScoringError::Model(format!("Array error: {}", e)))?;

        let input_tensor = Value::from_array(input_array)
            .map_err(|e| ScoringError::Model(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| ScoringError::Model(format!("Inference failed: {}", e)))?;

        let label_value = outputs.get(self.label_output.as_str())
            .ok_or_else(|| ScoringError::Model("No label output".to_string()))?;
        let (_, labels) = label_value.try_extract_tensor::<i64>()
            .map_err(|e| ScoringError::Model(format!("Extract label error: {}", e)))?;
        let label = *labels.first()
            .ok_or_else(|| ScoringError::Model("Empty label tensor".to_string()))?;

        let score = match self.score_output.as_deref() {
            Some(name) => outputs.get(name)
                .and_then(|value| value.try_extract_tensor::<f32>().ok())
                .and_then(|(_, data)| data.first().copied()),
            None => None,
        };

        if let Some(s) = score {
            if !s.is_finite() {
                return Err(ScoringError::Model(format!("Non-finite anomaly score: {}", s)));
            }
        }

        Ok(InferenceResult { label, score })
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.model_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.onnx");
        let err = OnnxModel::load(path.to_str().unwrap()).err().unwrap();
        match err {
            ScoringError::Model(msg) => assert!(msg.contains("Model not found")),
            other => panic!("Expected Model error, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.onnx");
        std::fs::write(&path, b"definitely not a protobuf").unwrap();
        assert!(OnnxModel::load(path.to_str().unwrap()).is_err());
    }
}
