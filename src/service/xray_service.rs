//! X-ray Service - Core business logic
//!
//! Decodes uploads, runs the classifier off the async runtime and keeps
//! running counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{preprocess::decode_image, Diagnosis, InferenceBackend, XrayClassifier};

use super::types::*;

#[derive(Default)]
struct PredictionStats {
    pneumonia: AtomicU64,
    normal: AtomicU64,
    failures: AtomicU64,
}

impl PredictionStats {
    fn record(&self, diagnosis: Diagnosis) {
        match diagnosis {
            Diagnosis::Pneumonia => self.pneumonia.fetch_add(1, Ordering::Relaxed),
            Diagnosis::Normal => self.normal.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> StatsSnapshot {
        let pneumonia = self.pneumonia.load(Ordering::Relaxed);
        let normal = self.normal.load(Ordering::Relaxed);
        StatsSnapshot {
            total_predictions: pneumonia + normal,
            pneumonia,
            normal,
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Chest X-ray classification service
pub struct XrayService<M: InferenceBackend> {
    classifier: Arc<XrayClassifier<M>>,
    apply_exif: bool,
    stats: PredictionStats,
}

impl<M: InferenceBackend> XrayService<M> {
    /// Create a new service around an already loaded model
    pub fn new(model: Arc<M>, config: &Config) -> Self {
        Self {
            classifier: Arc::new(XrayClassifier::new(model, &config.inference)),
            apply_exif: config.inference.apply_exif,
            stats: PredictionStats::default(),
        }
    }

    /// Classify an encoded image.
    ///
    /// Decode failures surface as `image::ImageError` inside the returned
    /// error so callers can tell bad input from inference failures.
    pub async fn predict(&self, image_data: &[u8]) -> Result<PredictionResult> {
        let start = Instant::now();

        let classifier = self.classifier.clone();
        let image_data = image_data.to_vec();
        let apply_exif = self.apply_exif;
        let outcome = tokio::task::spawn_blocking(move || {
            let image = decode_image(&image_data, apply_exif).context("Failed to decode image")?;
            debug!("Decoded {}x{} image", image.width(), image.height());
            classifier.classify(&image)
        })
        .await
        .context("Prediction task panicked")
        .and_then(|r| r);

        let classification = match outcome {
            Ok(c) => c,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        self.stats.record(classification.diagnosis);
        let inference_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Prediction: {} (score {:.4}) in {}ms",
            classification.diagnosis, classification.score, inference_time_ms
        );

        Ok(PredictionResult::new(
            classification.diagnosis,
            classification.score,
            inference_time_ms,
        ))
    }

    /// Get health status
    pub fn health(&self) -> HealthResult {
        let model = self.classifier.model();
        HealthResult {
            healthy: model.is_loaded(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_loaded: model.is_loaded(),
            model_name: model.name().to_string(),
            input_size: self.classifier.input_size(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
