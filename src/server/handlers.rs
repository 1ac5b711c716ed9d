//! HTTP handlers: prediction and health probe

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::health::{HealthStatus, OVERALL};
use crate::model::FeatureVector;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub features: FeatureVector,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: i64,
    pub score: Option<f32>,
}

/// POST /predict (also mounted at /v1/predict)
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> AppResult<Json<PredictResponse>> {
    let scorer = state.scorer.clone();
    let features = request.features;
    let task = tokio::task::spawn_blocking(move || scorer.score(&features));

    let outcome = match state.predict_timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| AppError::Timeout)?,
        None => task.await,
    };

    let result = outcome??;
    Ok(Json(PredictResponse {
        prediction: result.label,
        score: result.score,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub service: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub status: HealthStatus,
    pub timestamp: i64,
}

/// GET /health?service=<name>
///
/// 200 only while SERVING so HTTP checks map straight onto the registry.
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> (StatusCode, Json<HealthResponse>) {
    let service = query.service.unwrap_or_else(|| OVERALL.to_string());
    let status = state.health.get(&service);

    let code = if status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            service,
            status,
            timestamp: chrono::Utc::now().timestamp(),
        }),
    )
}
