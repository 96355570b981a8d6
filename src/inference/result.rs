use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::catalog::PoseLabel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: PoseLabel,
    pub confidence: f32,
}

/// Ranked classifier output for a single frame, highest confidence first.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct InferenceResult {
    predictions: Vec<Prediction>,
}

impl InferenceResult {
    /// Builds a ranked result. Non-finite confidences are discarded, the rest are
    /// clamped into `[0, 1]` and sorted in descending order (ties keep input order).
    pub fn new(predictions: impl IntoIterator<Item = (PoseLabel, f32)>) -> Self {
        let mut predictions: Vec<Prediction> = predictions
            .into_iter()
            .filter(|(_, confidence)| confidence.is_finite())
            .map(|(label, confidence)| Prediction {
                label,
                confidence: confidence.clamp(0.0, 1.0),
            })
            .collect();
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        Self { predictions }
    }

    pub fn single(label: impl Into<PoseLabel>, confidence: f32) -> Self {
        Self::new([(label.into(), confidence)])
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}
