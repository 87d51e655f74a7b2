//! REST API request/response data transfer objects

use serde::Serialize;

use crate::service::StatsSnapshot;

/// Predict response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub message: String,
    pub prediction: String,
    pub score: f32,
    pub inference_time_ms: u64,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub input_size: u32,
}

/// Metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub model_loaded: bool,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
