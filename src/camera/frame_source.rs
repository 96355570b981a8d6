use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{CameraBackend, CaptureDevice};
use super::CameraPosition;
use crate::authorization::AuthorizationProvider;
use crate::common::Frame;
use crate::error::CameraError;

/// Live, non-replayable sequence of frames. Dropping it ends capture.
pub struct FrameStream {
    inner: ReceiverStream<Frame>,
}

impl FrameStream {
    fn new(frame_rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            inner: ReceiverStream::new(frame_rx),
        }
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.inner.next().await
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct Capture {
    position: CameraPosition,
    cancel: CancellationToken,
    // Yields the stream sender back when capture was cancelled, None when the
    // device failed or the stream was dropped.
    task: JoinHandle<Option<mpsc::Sender<Frame>>>,
}

enum SourceState {
    Idle,
    Configured(Box<dyn CaptureDevice>),
    Streaming(Capture),
}

/// Owns one camera at a time and turns it into a [`FrameStream`].
pub struct FrameSource {
    backend: Arc<dyn CameraBackend>,
    authorization: Arc<dyn AuthorizationProvider>,
    queue_depth: usize,
    state: SourceState,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl FrameSource {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        authorization: Arc<dyn AuthorizationProvider>,
        queue_depth: usize,
    ) -> Self {
        Self {
            backend,
            authorization,
            queue_depth: queue_depth.max(1),
            state: SourceState::Idle,
            sequence: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claims the camera at `position`, releasing whatever was held before.
    pub async fn configure(&mut self, position: CameraPosition) -> Result<(), CameraError> {
        self.stop().await;
        if !self.authorization.status().is_authorized() {
            warn!("Refusing to open {} camera without authorization", position);
            return Err(CameraError::Unauthorized);
        }
        let device = self.backend.acquire(position)?;
        info!("Configured {} camera", position);
        self.state = SourceState::Configured(device);
        Ok(())
    }

    /// Starts delivering frames from the configured camera.
    pub async fn start(&mut self) -> Result<FrameStream, CameraError> {
        let device = match std::mem::replace(&mut self.state, SourceState::Idle) {
            SourceState::Configured(device) => device,
            SourceState::Idle => return Err(CameraError::NotConfigured),
            SourceState::Streaming(capture) => {
                let position = capture.position;
                self.state = SourceState::Streaming(capture);
                return Err(CameraError::Busy(position));
            }
        };

        let device = initialize(device).await?;
        let (frame_tx, frame_rx) = mpsc::channel(self.queue_depth);
        self.state = SourceState::Streaming(self.spawn_capture(device, frame_tx));
        Ok(FrameStream::new(frame_rx))
    }

    /// Tears down the current camera and reacquires the other-facing one.
    ///
    /// While streaming, the existing [`FrameStream`] keeps delivering frames from the
    /// new device. On failure the stream ends and `start` must be called again.
    pub async fn switch_camera(&mut self) -> Result<(), CameraError> {
        match std::mem::replace(&mut self.state, SourceState::Idle) {
            SourceState::Idle => Err(CameraError::NotConfigured),
            SourceState::Configured(device) => {
                let target = device.position().opposite();
                drop(device);
                let device = self
                    .backend
                    .acquire(target)
                    .map_err(|e| switch_failed(target, e))?;
                info!("Switched to {} camera", target);
                self.state = SourceState::Configured(device);
                Ok(())
            }
            SourceState::Streaming(capture) => {
                let target = capture.position.opposite();
                let frame_tx = finish_capture(capture).await.ok_or_else(|| {
                    CameraError::SwitchFailed("capture had already ended".to_string())
                })?;

                let device = self
                    .backend
                    .acquire(target)
                    .map_err(|e| switch_failed(target, e))?;
                let device = initialize(device)
                    .await
                    .map_err(|e| switch_failed(target, e))?;
                info!("Switched capture to {} camera", target);
                self.state = SourceState::Streaming(self.spawn_capture(device, frame_tx));
                Ok(())
            }
        }
    }

    /// Releases the camera and ends the stream. Returns once the device is free.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.state, SourceState::Idle) {
            SourceState::Idle => {}
            SourceState::Configured(device) => {
                debug!("Releasing idle {} camera", device.position());
            }
            SourceState::Streaming(capture) => {
                let position = capture.position;
                finish_capture(capture).await;
                info!("Stopped {} camera", position);
            }
        }
    }

    pub fn position(&self) -> Option<CameraPosition> {
        match &self.state {
            SourceState::Idle => None,
            SourceState::Configured(device) => Some(device.position()),
            SourceState::Streaming(capture) => Some(capture.position),
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, SourceState::Streaming(_))
    }

    /// Frames discarded because the stream queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn spawn_capture(
        &self,
        device: Box<dyn CaptureDevice>,
        frame_tx: mpsc::Sender<Frame>,
    ) -> Capture {
        let position = device.position();
        let cancel = CancellationToken::new();
        let sequence = Arc::clone(&self.sequence);
        let dropped = Arc::clone(&self.dropped);
        let loop_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            capture_loop(device, frame_tx, loop_cancel, sequence, dropped)
        });
        Capture {
            position,
            cancel,
            task,
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let SourceState::Streaming(capture) = &self.state {
            capture.cancel.cancel();
        }
    }
}

async fn initialize(
    mut device: Box<dyn CaptureDevice>,
) -> Result<Box<dyn CaptureDevice>, CameraError> {
    let position = device.position();
    tokio::task::spawn_blocking(move || device.initialize().map(|_| device))
        .await
        .map_err(|e| CameraError::DeviceError(e.to_string()))?
        .map_err(|e| {
            error!("Failed to initialize {} camera: {}", position, e);
            e
        })
}

async fn finish_capture(capture: Capture) -> Option<mpsc::Sender<Frame>> {
    capture.cancel.cancel();
    match capture.task.await {
        Ok(frame_tx) => frame_tx,
        Err(e) => {
            error!("Capture task for {} camera failed: {}", capture.position, e);
            None
        }
    }
}

fn switch_failed(target: CameraPosition, error: CameraError) -> CameraError {
    warn!("Switch to {} camera failed: {}", target, error);
    CameraError::SwitchFailed(error.to_string())
}

fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    frame_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
) -> Option<mpsc::Sender<Frame>> {
    let position = device.position();
    debug!("Capture loop started on {} camera", position);
    while !cancel.is_cancelled() {
        let image = match device.read_frame() {
            Ok(image) => image,
            Err(e) => {
                error!("Camera read failed on {} camera: {}", position, e);
                return None;
            }
        };
        let frame = Frame::new(sequence.fetch_add(1, Ordering::Relaxed), position, image);
        match frame_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Frame stream dropped, ending capture on {} camera", position);
                return None;
            }
        }
    }
    debug!("Capture loop cancelled on {} camera", position);
    Some(frame_tx)
}
