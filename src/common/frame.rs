use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Arc;
use uuid::Uuid;

use crate::camera::CameraPosition;

/// A single captured camera frame. Cloning shares the image buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    frame_id: Uuid,
    sequence: u64,
    camera: CameraPosition,
    captured_at: DateTime<Utc>,
    image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(sequence: u64, camera: CameraPosition, image: DynamicImage) -> Self {
        Self {
            frame_id: Uuid::new_v4(),
            sequence,
            camera,
            captured_at: Utc::now(),
            image: Arc::new(image),
        }
    }

    pub fn id(&self) -> Uuid {
        self.frame_id
    }

    /// Position of this frame in its capture stream, starting at zero.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn camera(&self) -> CameraPosition {
        self.camera
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn cloning_frame_shares_image_buffer() {
        let img: DynamicImage = DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(16, 16, Rgb([1, 2, 3])),
        );
        let f1 = Frame::new(3, CameraPosition::Front, img);
        let f2 = f1.clone();
        assert!(Arc::ptr_eq(&f1.image, &f2.image));
        assert_eq!(f1.id(), f2.id());
        assert_eq!(f2.sequence(), 3);
    }
}
