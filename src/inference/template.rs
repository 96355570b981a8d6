use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::{InferenceResult, PoseClassifier};
use crate::camera::render_pose;
use crate::catalog::PoseLabel;
use crate::common::Frame;
use crate::error::InferenceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseTemplate {
    pub label: PoseLabel,
    /// Grey levels in `[0, 1]`, row-major, `input_size * input_size` long.
    pub pixels: Vec<f32>,
}

/// Nearest-template pose model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateModel {
    pub input_size: u32,
    pub temperature: f32,
    /// Frames whose grey-level standard deviation is below this hold no subject.
    pub presence_threshold: f32,
    pub templates: Vec<PoseTemplate>,
}

impl TemplateModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            InferenceError::ModelUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let model: TemplateModel = serde_json::from_slice(&bytes).map_err(|e| {
            InferenceError::ModelUnavailable(format!("{}: {}", path.display(), e))
        })?;
        model.validate()?;
        info!(
            "Loaded pose model from {} with {} templates",
            path.display(),
            model.templates.len()
        );
        Ok(model)
    }

    /// Builds templates by rendering each label through the synthetic camera.
    pub fn bootstrap(
        labels: &[PoseLabel],
        frame_width: u32,
        frame_height: u32,
        input_size: u32,
    ) -> Self {
        let templates = labels
            .iter()
            .map(|label| PoseTemplate {
                label: label.clone(),
                pixels: preprocess(
                    &render_pose(Some(label), frame_width, frame_height, None),
                    input_size,
                ),
            })
            .collect();
        Self {
            input_size,
            temperature: 0.005,
            presence_threshold: 0.02,
            templates,
        }
    }

    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.input_size == 0 {
            return Err(InferenceError::ModelUnavailable(
                "input_size must be positive".to_string(),
            ));
        }
        if !(self.temperature > 0.0) {
            return Err(InferenceError::ModelUnavailable(
                "temperature must be positive".to_string(),
            ));
        }
        if self.templates.is_empty() {
            return Err(InferenceError::ModelUnavailable(
                "model has no templates".to_string(),
            ));
        }
        let side = self.input_size as usize;
        let expected = side.checked_mul(side).ok_or_else(|| {
            InferenceError::ModelUnavailable(format!("input_size {} is too large", self.input_size))
        })?;
        if let Some(bad) = self.templates.iter().find(|t| t.pixels.len() != expected) {
            return Err(InferenceError::ModelUnavailable(format!(
                "template {} has {} pixels, expected {}",
                bad.label,
                bad.pixels.len(),
                expected
            )));
        }
        Ok(())
    }
}

pub struct TemplateClassifier {
    model: TemplateModel,
}

impl TemplateClassifier {
    pub fn new(model: TemplateModel) -> Result<Self, InferenceError> {
        model.validate()?;
        Ok(Self { model })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        Self::new(TemplateModel::load(path)?)
    }

    pub fn model(&self) -> &TemplateModel {
        &self.model
    }
}

impl PoseClassifier for TemplateClassifier {
    fn classify(&self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
        let pixels = preprocess(frame.image(), self.model.input_size);

        let deviation = standard_deviation(&pixels);
        if deviation < self.model.presence_threshold {
            debug!(
                "Frame {} deviation {:.4} below presence threshold",
                frame.sequence(),
                deviation
            );
            return Err(InferenceError::NoPersonDetected);
        }

        let scores: Vec<f32> = self
            .model
            .templates
            .iter()
            .map(|template| {
                -mean_squared_distance(&pixels, &template.pixels) / self.model.temperature
            })
            .collect();
        let probabilities = softmax(&scores);

        Ok(InferenceResult::new(
            self.model
                .templates
                .iter()
                .map(|template| template.label.clone())
                .zip(probabilities),
        ))
    }
}

fn preprocess(image: &DynamicImage, input_size: u32) -> Vec<f32> {
    image
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_luma8()
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect()
}

fn standard_deviation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}

fn mean_squared_distance(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().max(1) as f32;
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>() / n
}

// Numerically stable softmax
fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return vec![];
    }
    let max_score = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max_score).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        // fallback to uniform
        let n = scores.len() as f32;
        return vec![1.0 / n; scores.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
