//! Inference backend
//!
//! The model is read and compiled once at startup and shared by every
//! request. Each call gets its own OpenVINO infer request.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, Shape, Tensor};
use parking_lot::Mutex;
use tracing::info;

use super::fetch::ModelArtifact;

/// A model that turns an input tensor into its raw output values
pub trait InferenceBackend: Send + Sync + 'static {
    /// Run a single forward pass
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>>;

    fn is_loaded(&self) -> bool;

    /// Human-readable model identifier (file name)
    fn name(&self) -> &str;
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync.
/// All access goes through the mutex.
struct SafeCompiledModel(Mutex<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

/// Model compiled with OpenVINO
pub struct OpenVinoModel {
    compiled: SafeCompiledModel,
    name: String,
    device: String,
    load_time: Duration,
}

impl OpenVinoModel {
    /// Read and compile the model artifact for `device`
    pub fn load(artifact: &ModelArtifact, device: &str) -> Result<Self> {
        let model_path = path_str(&artifact.model_path)?;
        let weights_path = match &artifact.weights_path {
            Some(p) => path_str(p)?,
            None => "",
        };

        info!("Loading model from {} on {}", model_path, device);
        let start = Instant::now();

        let mut core = Core::new()?;
        let model = core
            .read_model_from_file(model_path, weights_path)
            .with_context(|| format!("Failed to read model {}", model_path))?;
        let compiled = core
            .compile_model(&model, device.into())
            .with_context(|| format!("Failed to compile model for device {}", device))?;

        let load_time = start.elapsed();
        info!("Model loaded in {:?}", load_time);

        let name = artifact
            .model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.to_string());

        Ok(Self {
            compiled: SafeCompiledModel(Mutex::new(compiled)),
            name,
            device: device.to_string(),
            load_time,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn load_time(&self) -> Duration {
        self.load_time
    }
}

impl InferenceBackend for OpenVinoModel {
    fn infer(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let mut request = self.compiled.0.lock().create_infer_request()?;

        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let shape = Shape::new(&dims)?;
        let mut tensor = Tensor::new(ElementType::F32, &shape)?;

        let raw = tensor.get_raw_data_mut()?;
        for (dst, value) in raw.chunks_exact_mut(4).zip(input.iter()) {
            dst.copy_from_slice(&value.to_ne_bytes());
        }

        request.set_input_tensor(&tensor)?;
        request.infer()?;

        let output = request.get_output_tensor()?;
        let values = output
            .get_raw_data()?
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(values)
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Model path is not valid UTF-8: {}", path.display()))
}

/// Run one forward pass on a zero tensor so the first request
/// does not pay for lazy initialisation inside the runtime
pub fn warmup<M: InferenceBackend + ?Sized>(
    model: &M,
    shape: (usize, usize, usize, usize),
) -> Result<Duration> {
    let start = Instant::now();
    let input = Array4::<f32>::zeros(shape);
    let output = model.infer(&input)?;
    let elapsed = start.elapsed();
    info!("Warm-up pass produced {} values in {:?}", output.len(), elapsed);
    Ok(elapsed)
}
