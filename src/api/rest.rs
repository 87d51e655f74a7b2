//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::ServerConfig;
use crate::engine::InferenceBackend;
use crate::service::XrayService;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState<M: InferenceBackend> {
    pub service: Arc<XrayService<M>>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router<M: InferenceBackend>(
    state: Arc<AppState<M>>,
    server: &ServerConfig,
) -> Router {
    Router::new()
        // Upload form
        .route_service("/", ServeFile::new(&server.index_page))
        .route("/predict", post(predict_handler::<M>))
        // System endpoints
        .route("/health", get(health_handler::<M>))
        .route("/metrics", get(metrics_handler::<M>))
        // Middleware
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: &str, code: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message, code)))
}

/// Classify an uploaded X-ray (multipart field `file`)
async fn predict_handler<M: InferenceBackend>(
    State(state): State<Arc<AppState<M>>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut empty_filename = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&e.to_string(), "MULTIPART_ERROR"))?
    {
        if field.name() != Some("file") {
            continue;
        }

        // Plain form values named `file` are not uploads
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };

        // Only the first upload counts
        if file_name.trim().is_empty() {
            empty_filename = true;
        } else {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(&e.to_string(), "READ_ERROR"))?;
            image_data = Some(bytes.to_vec());
        }
        break;
    }

    let image_data = match image_data {
        Some(data) => data,
        None if empty_filename => return Err(bad_request("No file selected", "NO_FILE_SELECTED")),
        None => return Err(bad_request("No file uploaded", "NO_FILE_UPLOADED")),
    };

    let result = state.service.predict(&image_data).await.map_err(|e| {
        if e.downcast_ref::<image::ImageError>().is_some() {
            warn!("Rejected upload: {:#}", e);
            bad_request(&format!("{:#}", e), "INVALID_IMAGE")
        } else {
            error!("Prediction failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(&format!("{:#}", e), "PREDICTION_FAILED")),
            )
        }
    })?;

    Ok(Json(PredictResponse {
        message: result.message,
        prediction: result.prediction,
        score: result.score,
        inference_time_ms: result.inference_time_ms,
    }))
}

/// Health check
async fn health_handler<M: InferenceBackend>(
    State(state): State<Arc<AppState<M>>>,
) -> Json<HealthResponse> {
    let health = state.service.health();

    Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        model_loaded: health.model_loaded,
        model_name: health.model_name,
        input_size: health.input_size,
    })
}

/// Metrics
async fn metrics_handler<M: InferenceBackend>(
    State(state): State<Arc<AppState<M>>>,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        stats: state.service.stats(),
        model_loaded: state.service.health().model_loaded,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
