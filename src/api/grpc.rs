//! gRPC service implementation

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::error;

use crate::engine::InferenceBackend;
use crate::service::XrayService;

// Include generated protobuf code
pub mod proto {
    tonic::include_proto!("xray");
}

use proto::xray_classifier_server::{XrayClassifier, XrayClassifierServer};
use proto::*;

/// gRPC service implementation
pub struct GrpcHandler<M: InferenceBackend> {
    service: Arc<XrayService<M>>,
}

impl<M: InferenceBackend> GrpcHandler<M> {
    pub fn new(service: Arc<XrayService<M>>) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> XrayClassifierServer<Self> {
        XrayClassifierServer::new(self)
    }
}

#[tonic::async_trait]
impl<M: InferenceBackend> XrayClassifier for GrpcHandler<M> {
    async fn predict(
        &self,
        request: Request<PredictRequest>,
    ) -> Result<Response<PredictResponse>, Status> {
        let req = request.into_inner();

        if req.image_data.is_empty() {
            return Err(Status::invalid_argument("No file uploaded"));
        }

        let result = self.service.predict(&req.image_data).await.map_err(|e| {
            if e.downcast_ref::<image::ImageError>().is_some() {
                Status::invalid_argument(format!("{:#}", e))
            } else {
                error!("Prediction failed: {:#}", e);
                Status::internal(format!("{:#}", e))
            }
        })?;

        Ok(Response::new(PredictResponse {
            prediction: result.prediction,
            score: result.score,
            message: result.message,
            inference_time_ms: result.inference_time_ms as i32,
        }))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let health = self.service.health();

        Ok(Response::new(HealthResponse {
            healthy: health.healthy,
            version: health.version,
            model_loaded: health.model_loaded,
            model_name: health.model_name,
            input_size: health.input_size,
        }))
    }
}
