pub mod controller;
pub mod metrics;
pub mod worker;

pub use controller::{SessionController, SessionControllerBuilder};
pub use metrics::{MetricsSnapshot, SessionMetrics};

use crate::authorization::CameraAuthorizationStatus;
use crate::catalog::PoseLabel;
use crate::error::{CameraError, InferenceError};

/// Notifications for the presentation layer, delivered on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The user has missed the target long enough to be offered its tutorial.
    SuggestTutorial { pose: PoseLabel },
    CameraFault(CameraError),
    InferenceFault(InferenceError),
    /// The frame stream ended without the session being stopped.
    CaptureEnded,
    AuthorizationChanged(CameraAuthorizationStatus),
}
