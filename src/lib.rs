pub mod authorization;
pub mod camera;
pub mod catalog;
pub mod common;
pub mod config;
pub mod error;
pub mod feedback;
pub mod inference;
pub mod session;

pub use error::{AppError, CameraError, InferenceError, SessionError};

pub use authorization::{AuthorizationProvider, AuthorizationState, CameraAuthorizationStatus};
pub use camera::{CameraPosition, FrameSource, FrameStream};
pub use catalog::{PoseCatalog, PoseLabel, StaticCatalog};
pub use config::Configuration;
pub use feedback::{FeedbackSnapshot, FeedbackStatus};
pub use inference::{InferenceResult, PoseClassifier};
pub use session::{SessionController, SessionControllerBuilder, SessionEvent};
