use image::DynamicImage;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::CameraPosition;
use crate::error::CameraError;

/// A claimed physical camera.
pub trait CaptureDevice: Send {
    fn position(&self) -> CameraPosition;

    /// Powers up the sensor. Called once before the first read.
    fn initialize(&mut self) -> Result<(), CameraError>;

    /// Blocks until the next frame is delivered by the hardware.
    fn read_frame(&mut self) -> Result<DynamicImage, CameraError>;
}

/// Hands out exclusive devices. Acquisition never blocks.
pub trait CameraBackend: Send + Sync {
    fn acquire(&self, position: CameraPosition) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Process-wide record of which camera positions are held.
#[derive(Debug, Clone, Default)]
pub struct DeviceClaims {
    held: Arc<Mutex<HashSet<CameraPosition>>>,
}

impl DeviceClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self, position: CameraPosition) -> Result<DeviceLease, CameraError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| CameraError::DeviceError("device registry poisoned".to_string()))?;
        if !held.insert(position) {
            return Err(CameraError::Busy(position));
        }
        debug!("Claimed {} camera", position);
        Ok(DeviceLease {
            position,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, position: CameraPosition) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&position))
            .unwrap_or(false)
    }
}

/// Exclusive claim on one camera position; dropping it releases the device.
#[derive(Debug)]
pub struct DeviceLease {
    position: CameraPosition,
    held: Arc<Mutex<HashSet<CameraPosition>>>,
}

impl DeviceLease {
    pub fn position(&self) -> CameraPosition {
        self.position
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.position);
        }
        debug!("Released {} camera", self.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_fast_until_released() {
        let claims = DeviceClaims::new();
        let lease = claims.try_claim(CameraPosition::Front).unwrap();
        assert_eq!(
            claims.try_claim(CameraPosition::Front).unwrap_err(),
            CameraError::Busy(CameraPosition::Front)
        );
        assert!(claims.try_claim(CameraPosition::Back).is_ok());

        drop(lease);
        assert!(!claims.is_held(CameraPosition::Front));
        assert!(claims.try_claim(CameraPosition::Front).is_ok());
    }
}
