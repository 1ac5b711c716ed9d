//! Model Module - Scoring Adapter
//!
//! Wraps the trained anomaly detector behind a fixed input/output contract.
//! Swapping the runtime only touches `onnx.rs`.

pub mod scoring;
pub mod onnx;

// Re-export common types
pub use scoring::{FeatureVector, InferenceResult, ScoringAdapter, ScoringModel};
pub use onnx::OnnxModel;
