//! Service layer types

use serde::Serialize;

use crate::engine::Diagnosis;

/// Prediction for one uploaded X-ray
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    #[serde(skip)]
    pub diagnosis: Diagnosis,
    pub prediction: String,
    pub score: f32,
    pub message: String,
    pub inference_time_ms: u64,
}

impl PredictionResult {
    pub fn new(diagnosis: Diagnosis, score: f32, inference_time_ms: u64) -> Self {
        Self {
            diagnosis,
            prediction: diagnosis.as_str().to_string(),
            score,
            message: format!("The uploaded X-ray indicates: {}", diagnosis),
            inference_time_ms,
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub input_size: u32,
}

/// Counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_predictions: u64,
    pub pneumonia: u64,
    pub normal: u64,
    pub failures: u64,
}
