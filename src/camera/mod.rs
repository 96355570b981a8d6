pub mod device;
pub mod frame_source;
pub mod synthetic;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use device::{CameraBackend, CaptureDevice, DeviceClaims, DeviceLease};
pub use frame_source::{FrameSource, FrameStream};
pub use synthetic::{render_pose, SyntheticCameraBackend, SyntheticScene};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => f.write_str("front"),
            CameraPosition::Back => f.write_str("back"),
        }
    }
}
