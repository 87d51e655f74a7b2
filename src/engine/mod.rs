//! Inference engine module
//!
//! Provides OpenVINO-based inference with:
//! - Model artifact resolution (local, Hugging Face Hub, Dropbox)
//! - Load-once model shared across requests
//! - X-ray preprocessing and binary classification

pub mod classifier;
pub mod fetch;
pub mod model;
pub mod preprocess;

pub use classifier::{Classification, Diagnosis, XrayClassifier};
pub use fetch::{fetcher_for, ModelArtifact, ModelFetcher};
pub use model::{InferenceBackend, OpenVinoModel};
