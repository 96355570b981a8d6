use thiserror::Error;

use crate::authorization::CameraAuthorizationStatus;
use crate::camera::CameraPosition;
use crate::catalog::PoseLabel;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Session Error: {0}")]
    Session(#[from] SessionError),
    #[error("Inference Error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),
    #[error("Catalog Error: {0}")]
    Catalog(#[from] serde_json::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

// Frame Source Error Type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera access has not been granted")]
    Unauthorized,
    #[error("No camera available at the {0} position")]
    Unavailable(CameraPosition),
    #[error("The {0} camera is already in use")]
    Busy(CameraPosition),
    #[error("Camera device error: {0}")]
    DeviceError(String),
    #[error("Failed to switch camera: {0}")]
    SwitchFailed(String),
    #[error("No camera has been configured")]
    NotConfigured,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Pose model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("No person detected in frame")]
    NoPersonDetected,
    #[error("Pose classification timed out")]
    Timeout,
    #[error("Pose classification interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No practice session is active")]
    NotStarted,
    #[error("A practice session is already active")]
    AlreadyActive,
    #[error("Unknown pose: {0}")]
    UnknownPose(PoseLabel),
    #[error("Camera access not authorized ({0:?})")]
    NotAuthorized(CameraAuthorizationStatus),
    #[error("Camera authorization request was not answered in time")]
    AuthorizationUnresolved,
    #[error("Camera Error: {0}")]
    Camera(#[from] CameraError),
    #[error("Inference Error: {0}")]
    Inference(#[from] InferenceError),
}
