use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::device::{CameraBackend, CaptureDevice, DeviceClaims, DeviceLease};
use super::CameraPosition;
use crate::catalog::PoseLabel;
use crate::error::CameraError;

const BACKGROUND: u8 = 90;
const FIGURE: u8 = 230;
const LIMBS: u32 = 5;
const GRID: u32 = 8;

/// What the synthetic camera is looking at. Shared between the backend and whoever
/// plays the user.
#[derive(Debug, Clone, Default)]
pub struct SyntheticScene {
    pose: Arc<RwLock<Option<PoseLabel>>>,
}

impl SyntheticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pose(pose: impl Into<PoseLabel>) -> Self {
        let scene = Self::new();
        scene.set_pose(Some(pose.into()));
        scene
    }

    pub fn set_pose(&self, pose: Option<PoseLabel>) {
        if let Ok(mut current) = self.pose.write() {
            *current = pose;
        }
    }

    pub fn pose(&self) -> Option<PoseLabel> {
        self.pose.read().ok().and_then(|pose| pose.clone())
    }
}

/// Renders a figure for `pose` on a flat background. `None` renders an empty room.
/// With a `noise_seed` the image carries a small deterministic sensor noise.
pub fn render_pose(
    pose: Option<&PoseLabel>,
    width: u32,
    height: u32,
    noise_seed: Option<u64>,
) -> DynamicImage {
    let mut img: RgbImage =
        ImageBuffer::from_pixel(width, height, Rgb([BACKGROUND, BACKGROUND, BACKGROUND]));

    if let Some(pose) = pose {
        // Torso is shared by every pose; limb cells are picked from the label hash.
        fill_cell(&mut img, 3, 3, 2, 2);
        let hash = fnv1a(pose.as_str().as_bytes());
        for limb in 0..LIMBS {
            let cell = ((hash >> (limb * 6)) & 0x3f) as u32;
            fill_cell(&mut img, cell % GRID, cell / GRID, 1, 1);
        }
    }

    if let Some(seed) = noise_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        for pixel in img.pixels_mut() {
            let delta: i16 = rng.random_range(-2..=2);
            let value = (pixel[0] as i16 + delta).clamp(0, 255) as u8;
            *pixel = Rgb([value, value, value]);
        }
    }

    DynamicImage::ImageRgb8(img)
}

fn fill_cell(img: &mut RgbImage, cell_x: u32, cell_y: u32, span_x: u32, span_y: u32) {
    let (width, height) = img.dimensions();
    let x0 = cell_x * width / GRID;
    let x1 = ((cell_x + span_x) * width / GRID).min(width);
    let y0 = cell_y * height / GRID;
    let y1 = ((cell_y + span_y) * height / GRID).min(height);
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Rgb([FIGURE, FIGURE, FIGURE]));
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(0x100000001b3)
    })
}

/// Camera backend that renders the current [`SyntheticScene`] at a fixed cadence.
pub struct SyntheticCameraBackend {
    claims: DeviceClaims,
    scene: SyntheticScene,
    positions: Vec<CameraPosition>,
    width: u32,
    height: u32,
    frame_interval: Duration,
    initialize_failure: Option<String>,
}

impl SyntheticCameraBackend {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            claims: DeviceClaims::new(),
            scene,
            positions: vec![CameraPosition::Front, CameraPosition::Back],
            width: 120,
            height: 160,
            frame_interval: Duration::from_millis(33),
            initialize_failure: None,
        }
    }

    pub fn with_positions(mut self, positions: Vec<CameraPosition>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    /// Makes every device fail hardware initialization with `diagnostic`.
    pub fn with_initialize_failure(mut self, diagnostic: impl Into<String>) -> Self {
        self.initialize_failure = Some(diagnostic.into());
        self
    }

    pub fn claims(&self) -> &DeviceClaims {
        &self.claims
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

impl CameraBackend for SyntheticCameraBackend {
    fn acquire(&self, position: CameraPosition) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if !self.positions.contains(&position) {
            return Err(CameraError::Unavailable(position));
        }
        let lease = self.claims.try_claim(position)?;
        Ok(Box::new(SyntheticDevice {
            lease,
            scene: self.scene.clone(),
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            initialize_failure: self.initialize_failure.clone(),
            frames_read: 0,
            last_read: None,
        }))
    }
}

struct SyntheticDevice {
    lease: DeviceLease,
    scene: SyntheticScene,
    width: u32,
    height: u32,
    frame_interval: Duration,
    initialize_failure: Option<String>,
    frames_read: u64,
    last_read: Option<Instant>,
}

impl CaptureDevice for SyntheticDevice {
    fn position(&self) -> CameraPosition {
        self.lease.position()
    }

    fn initialize(&mut self) -> Result<(), CameraError> {
        match &self.initialize_failure {
            Some(diagnostic) => Err(CameraError::DeviceError(diagnostic.clone())),
            None => Ok(()),
        }
    }

    fn read_frame(&mut self) -> Result<DynamicImage, CameraError> {
        if let Some(last_read) = self.last_read {
            let elapsed = last_read.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
        self.frames_read += 1;

        let pose = self.scene.pose();
        Ok(render_pose(
            pose.as_ref(),
            self.width,
            self.height,
            Some(self.frames_read),
        ))
    }
}
