//! Pneumonia / normal classifier
//!
//! Maps the model's raw output to a probability of pneumonia and then
//! to a label.

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use image::DynamicImage;

use crate::config::{InferenceConfig, TensorLayout};
use crate::utils::math::softmax;

use super::model::InferenceBackend;
use super::preprocess::{input_shape, preprocess_for_classification};

/// Classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diagnosis {
    Normal,
    Pneumonia,
}

impl Diagnosis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnosis::Normal => "Normal",
            Diagnosis::Pneumonia => "Pneumonia",
        }
    }

    /// Scores at or above the threshold are pneumonia
    pub fn from_score(score: f32, threshold: f32) -> Self {
        if score >= threshold {
            Diagnosis::Pneumonia
        } else {
            Diagnosis::Normal
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability of pneumonia from the raw model output.
///
/// A single value is a sigmoid output. Two values are per-class
/// logits/probabilities with pneumonia at index 1.
pub fn score_from_output(output: &[f32]) -> Result<f32> {
    match output {
        [] => bail!("Model produced no output"),
        [score] => Ok(*score),
        [_, _] => Ok(softmax(output)[1]),
        _ => bail!(
            "Expected 1 or 2 output values for binary classification, got {}",
            output.len()
        ),
    }
}

/// Single image classification result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub diagnosis: Diagnosis,
    pub score: f32,
}

/// Preprocess + forward pass + thresholding for one image
pub struct XrayClassifier<M: InferenceBackend> {
    model: Arc<M>,
    input_size: u32,
    layout: TensorLayout,
    threshold: f32,
}

impl<M: InferenceBackend> XrayClassifier<M> {
    pub fn new(model: Arc<M>, config: &InferenceConfig) -> Self {
        Self {
            model,
            input_size: config.input_size,
            layout: config.input_layout,
            threshold: config.threshold,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        input_shape(self.input_size, self.layout)
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    /// Classify a decoded image. Blocking; call from a blocking thread.
    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let input = preprocess_for_classification(image, self.input_size, self.layout);
        let output = self.model.infer(&input)?;
        let score = score_from_output(&output)?;

        Ok(Classification {
            diagnosis: Diagnosis::from_score(score, self.threshold),
            score,
        })
    }
}
