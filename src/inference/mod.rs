pub mod layer;
pub mod result;
pub mod service;
pub mod template;

pub use layer::{Timed, TimingLayer};
pub use result::{InferenceResult, Prediction};
pub use service::{ClassifierService, InferenceAdapter};
pub use template::{PoseTemplate, TemplateClassifier, TemplateModel};

use crate::common::Frame;
use crate::error::InferenceError;

/// Opaque pose model: image in, ranked labels out.
///
/// Implementations are expected to be expensive and must be deterministic for a
/// fixed frame. Callers run them off the frame-delivery lane.
pub trait PoseClassifier: Send + Sync {
    fn classify(&self, frame: &Frame) -> Result<InferenceResult, InferenceError>;
}
