//! Error handling

use std::net::SocketAddr;

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Scoring adapter failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("expected {expected} features, got {actual}")]
    InvalidInput { expected: usize, actual: usize },

    #[error("model error: {0}")]
    Model(String),
}

/// Discovery backend failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("discovery backend unreachable: {0}")]
    Connection(String),

    #[error("discovery backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("registration failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Fatal lifecycle errors; any of these ends the process non-zero
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to load model: {0}")]
    ModelLoad(#[source] ScoringError),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("service registration failed: {0}")]
    Registration(#[source] DiscoveryError),
}

/// Per-request errors returned to HTTP callers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model failure: {0}")]
    ModelFailure(String),

    #[error("inference timed out")]
    Timeout,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::ModelFailure(msg) => {
                tracing::error!("Prediction failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error during prediction")
            }
            AppError::Timeout => {
                tracing::warn!("Prediction exceeded its deadline");
                (StatusCode::GATEWAY_TIMEOUT, "Prediction timed out")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<ScoringError> for AppError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::InvalidInput { .. } => AppError::InvalidInput(err.to_string()),
            ScoringError::Model(msg) => AppError::ModelFailure(msg),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::InternalError(format!("scoring task aborted: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoring_errors_map_to_status_codes() {
        let bad = AppError::from(ScoringError::InvalidInput { expected: 41, actual: 40 });
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let broken = AppError::from(ScoringError::Model("NaN in tree 7".into()));
        assert_eq!(broken.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(AppError::Timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_invalid_input_message_is_descriptive() {
        let err = ScoringError::InvalidInput { expected: 41, actual: 40 };
        assert_eq!(err.to_string(), "expected 41 features, got 40");
    }
}
