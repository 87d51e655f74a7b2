//! X-ray classification service configuration

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub rest_port: u16,
    pub grpc_port: u16,
    pub max_upload_bytes: usize,
    pub index_page: PathBuf,
}

impl ServerConfig {
    /// Resolve `host:port` the way `TcpListener::bind` does, so host names
    /// such as `localhost` work for the gRPC listener too
    pub async fn resolve(&self, port: u16) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", self.host, port))?
            .next()
            .with_context(|| format!("No address found for {}:{}", self.host, port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            rest_port: 5000,
            grpc_port: 50051,
            max_upload_bytes: 20 * 1024 * 1024,
            index_page: PathBuf::from("static/index.html"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
    /// Edge length of the square model input, in pixels
    pub input_size: u32,
    pub input_layout: TensorLayout,
    pub threshold: f32,
    pub warmup: bool,
    /// Rotate/flip uploads according to their EXIF orientation tag.
    /// Off by default: Keras `load_img` feeds the stored pixel layout.
    pub apply_exif: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            input_size: 254,
            input_layout: TensorLayout::Nhwc,
            threshold: 0.5,
            warmup: true,
            apply_exif: false,
        }
    }
}

/// Memory layout of the model's input tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Batch, height, width, channels (Keras / TensorFlow exports)
    #[default]
    Nhwc,
    /// Batch, channels, height, width (PyTorch exports)
    Nchw,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory where downloaded artifacts are cached
    pub cache_dir: PathBuf,
    pub source: ModelSource,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("models"),
            source: ModelSource::Local {
                path: PathBuf::from("models/pneumonia_classifier.onnx"),
                weights_path: None,
            },
        }
    }
}

/// Where the model artifact comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSource {
    Local {
        path: PathBuf,
        weights_path: Option<PathBuf>,
    },
    HuggingFace {
        repo_id: String,
        filename: String,
        #[serde(default = "default_revision")]
        revision: String,
        weights_filename: Option<String>,
    },
    Dropbox {
        url: String,
        filename: String,
    },
}

impl ModelSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelSource::Local { .. } => "local",
            ModelSource::HuggingFace { .. } => "huggingface",
            ModelSource::Dropbox { .. } => "dropbox",
        }
    }
}

fn default_revision() -> String {
    "main".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path))
    }

    /// Load `path`, or use the defaults when the file does not exist.
    /// A file that exists but fails to parse is an error.
    pub fn load_or_default(path: &str) -> Result<(Self, bool)> {
        if !Path::new(path).exists() {
            let config = Self::default();
            config.validate()?;
            return Ok((config, false));
        }
        Ok((Self::load(path)?, true))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path, overridable with `XRAYSERVE_CONFIG`
    pub fn default_path() -> String {
        std::env::var("XRAYSERVE_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Apply `XRAYSERVE_*` environment overrides on top of the loaded file
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("XRAYSERVE_REST_PORT") {
            self.server.rest_port = port.parse()?;
        }
        if let Ok(path) = std::env::var("XRAYSERVE_MODEL_PATH") {
            self.model.source = ModelSource::Local {
                path: PathBuf::from(path),
                weights_path: None,
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.inference.input_size == 0 {
            bail!("inference.input_size must be greater than zero");
        }
        if !(self.inference.threshold > 0.0 && self.inference.threshold < 1.0) {
            bail!(
                "inference.threshold must be in (0, 1), got {}",
                self.inference.threshold
            );
        }
        if self.server.rest_port == self.server.grpc_port {
            bail!("rest_port and grpc_port must differ ({})", self.server.rest_port);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inference.input_size, 254);
        assert_eq!(config.server.rest_port, 5000);
    }

    #[test]
    fn test_parse_huggingface_source() {
        let config = Config::from_toml(
            r#"
            [server]
            rest_port = 8080
            grpc_port = 50052

            [inference]
            device = "CPU"
            input_size = 224

            [model]
            cache_dir = "/tmp/models"

            [model.source]
            kind = "huggingface"
            repo_id = "someone/pneumonia-cnn"
            filename = "model.onnx"
            "#,
        )
        .unwrap();

        assert_eq!(config.inference.input_size, 224);
        assert_eq!(config.inference.input_layout, TensorLayout::Nhwc);
        assert!((config.inference.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(
            config.model.source,
            ModelSource::HuggingFace {
                repo_id: "someone/pneumonia-cnn".to_string(),
                filename: "model.onnx".to_string(),
                revision: "main".to_string(),
                weights_filename: None,
            }
        );
    }

    #[test]
    fn test_parse_dropbox_source_with_nchw() {
        let config = Config::from_toml(
            r#"
            [server]
            rest_port = 5000
            grpc_port = 50051

            [inference]
            device = "GPU"
            input_size = 254
            input_layout = "nchw"
            threshold = 0.7

            [model.source]
            kind = "dropbox"
            url = "https://www.dropbox.com/s/abc/model.onnx?dl=0"
            filename = "model.onnx"
            "#,
        )
        .unwrap();

        assert_eq!(config.inference.input_layout, TensorLayout::Nchw);
        assert_eq!(config.model.source.kind(), "dropbox");
        assert_eq!(config.model.cache_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.inference.threshold = 1.5;
        assert!(config.validate().is_err());

        config.inference.threshold = 0.5;
        config.inference.input_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shared_port() {
        let mut config = Config::default();
        config.server.grpc_port = config.server.rest_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_only_config_gets_defaults() {
        let config = Config::from_toml(
            r#"
            [model.source]
            kind = "huggingface"
            repo_id = "someone/pneumonia-cnn"
            filename = "model.onnx"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.rest_port, 5000);
        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.inference.device, "CPU");
        assert_eq!(config.inference.input_size, 254);
        assert!(!config.inference.apply_exif);
        assert_eq!(config.model.cache_dir, PathBuf::from("models"));
        assert_eq!(config.model.source.kind(), "huggingface");
    }

    #[test]
    fn test_partial_inference_section() {
        let config = Config::from_toml("[inference]\ninput_size = 224\n").unwrap();

        assert_eq!(config.inference.input_size, 224);
        assert_eq!(config.inference.device, "CPU");
        assert!(config.inference.warmup);
        assert_eq!(config.model.source.kind(), "local");
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("absent.toml");
        let (config, from_file) = Config::load_or_default(missing.to_str().unwrap()).unwrap();
        assert!(!from_file);
        assert_eq!(config.server.rest_port, 5000);

        let valid = dir.path().join("valid.toml");
        std::fs::write(&valid, "[server]\nrest_port = 8000\n").unwrap();
        let (config, from_file) = Config::load_or_default(valid.to_str().unwrap()).unwrap();
        assert!(from_file);
        assert_eq!(config.server.rest_port, 8000);

        // A broken file must not silently turn into the default model source
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[model.source]\nkind = \"ftp\"\n").unwrap();
        assert!(Config::load_or_default(broken.to_str().unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_resolve_host_names() {
        let mut server = ServerConfig::default();
        let addr = server.resolve(50051).await.unwrap();
        assert_eq!(addr, "0.0.0.0:50051".parse::<SocketAddr>().unwrap());

        server.host = "localhost".to_string();
        let addr = server.resolve(50052).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 50052);
    }
}
