use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::worker::{pump_frames, InferenceWorker, WorkerCommand};
use super::{MetricsSnapshot, SessionEvent, SessionMetrics};
use crate::authorization::{
    AuthorizationProvider, AuthorizationState, CameraAuthorizationStatus,
};
use crate::camera::{CameraBackend, CameraPosition, FrameSource, FrameStream};
use crate::catalog::{PoseCatalog, PoseLabel, StaticCatalog};
use crate::common::Frame;
use crate::config::Configuration;
use crate::error::{AppError, CameraError, InferenceError, SessionError};
use crate::feedback::{FeedbackSnapshot, FeedbackStateMachine};
use crate::inference::{InferenceAdapter, PoseClassifier};

const EVENT_BUFFER_SIZE: usize = 64;
const COMMAND_BUFFER_SIZE: usize = 4;

struct ActiveSession {
    id: Uuid,
    target: PoseLabel,
    cancel: CancellationToken,
    capture_cancel: CancellationToken,
    pump_cancel: CancellationToken,
    command_tx: mpsc::Sender<WorkerCommand>,
    frame_slot: Arc<watch::Sender<Option<Frame>>>,
    worker: JoinHandle<FeedbackStateMachine>,
    pump: Option<JoinHandle<()>>,
    authorization_watch: JoinHandle<()>,
}

/// Runs practice sessions: one camera, one target pose, one feedback signal.
pub struct SessionController {
    configuration: Configuration,
    catalog: Arc<dyn PoseCatalog>,
    authorization: Arc<dyn AuthorizationProvider>,
    classifier: Arc<dyn PoseClassifier>,
    frame_source: FrameSource,
    metrics: Arc<SessionMetrics>,
    feedback_tx: Arc<watch::Sender<FeedbackSnapshot>>,
    authorization_tx: Arc<watch::Sender<AuthorizationState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn builder(configuration: Configuration) -> SessionControllerBuilder {
        SessionControllerBuilder::new(configuration)
    }

    fn new(
        configuration: Configuration,
        catalog: Arc<dyn PoseCatalog>,
        authorization: Arc<dyn AuthorizationProvider>,
        camera_backend: Arc<dyn CameraBackend>,
        classifier: Arc<dyn PoseClassifier>,
    ) -> Self {
        let frame_source = FrameSource::new(
            camera_backend,
            Arc::clone(&authorization),
            configuration.capture.frame_queue_depth,
        );
        let initial_authorization = match authorization.status() {
            CameraAuthorizationStatus::NotDetermined => AuthorizationState::AwaitingUser,
            status => AuthorizationState::Resolved(status),
        };
        let (feedback_tx, _) = watch::channel(FeedbackSnapshot::idle());
        let (authorization_tx, _) = watch::channel(initial_authorization);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Self {
            configuration,
            catalog,
            authorization,
            classifier,
            frame_source,
            metrics: Arc::new(SessionMetrics::new()),
            feedback_tx: Arc::new(feedback_tx),
            authorization_tx: Arc::new(authorization_tx),
            events_tx,
            active: None,
        }
    }

    /// Starts practicing `target` on the camera at `camera`.
    pub async fn start_session(
        &mut self,
        target: impl Into<PoseLabel>,
        camera: CameraPosition,
    ) -> Result<Uuid, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        let target = target.into();
        if !self.catalog.contains(&target) {
            warn!("Rejecting session for unknown pose {}", target);
            return Err(SessionError::UnknownPose(target));
        }

        self.resolve_authorization().await?;

        let stream = match open_camera(&mut self.frame_source, camera).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open {} camera: {}", camera, e);
                let _ = self.events_tx.send(SessionEvent::CameraFault(e.clone()));
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (frame_slot, frame_rx) = watch::channel(None);
        let frame_slot = Arc::new(frame_slot);

        let capture_cancel = cancel.child_token();
        let pump_cancel = capture_cancel.child_token();
        let pump = tokio::spawn(pump_frames(
            stream,
            Arc::clone(&frame_slot),
            self.events_tx.clone(),
            Arc::clone(&self.metrics),
            pump_cancel.clone(),
        ));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let worker = InferenceWorker::new(
            FeedbackStateMachine::new(
                target.clone(),
                self.configuration.feedback.clone(),
                Instant::now(),
            ),
            InferenceAdapter::new(
                Arc::clone(&self.classifier),
                self.configuration.inference.timeout(),
                Arc::clone(&self.metrics),
            ),
            frame_rx,
            command_rx,
            Arc::clone(&self.feedback_tx),
            self.events_tx.clone(),
            Arc::clone(&self.metrics),
            self.configuration.capture.sample_interval(),
            cancel.clone(),
            capture_cancel.clone(),
        );
        let worker = tokio::spawn(worker.run());

        let authorization_watch = tokio::spawn(watch_authorization(
            self.authorization.subscribe(),
            Arc::clone(&self.authorization_tx),
            self.events_tx.clone(),
            cancel.clone(),
        ));

        info!("Started session {} for {} on {} camera", id, target, camera);
        self.active = Some(ActiveSession {
            id,
            target,
            cancel,
            capture_cancel,
            pump_cancel,
            command_tx,
            frame_slot,
            worker,
            pump: Some(pump),
            authorization_watch,
        });
        Ok(id)
    }

    /// Suspends inference, keeping the camera and the streak counters.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.send_command(|responder| WorkerCommand::Pause { responder })
            .await
    }

    /// Re-enters evaluation with frames captured after this call.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.send_command(|responder| WorkerCommand::Resume { responder })
            .await
    }

    /// Ends the active session and releases the camera. Does nothing when idle.
    pub async fn stop_session(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("stop_session called with no active session");
            return;
        };
        active.cancel.cancel();

        let snapshot = match active.worker.await {
            Ok(mut machine) => {
                machine.stop();
                machine.snapshot()
            }
            Err(e) => {
                error!("Inference lane for session {} failed: {}", active.id, e);
                FeedbackSnapshot {
                    target: Some(active.target.clone()),
                    ..FeedbackSnapshot::idle()
                }
            }
        };
        if let Some(pump) = active.pump {
            if let Err(e) = pump.await {
                error!("Frame pump for session {} failed: {}", active.id, e);
            }
        }
        let _ = active.authorization_watch.await;
        self.frame_source.stop().await;
        self.feedback_tx.send_replace(snapshot);

        let metrics = self.metrics();
        info!(
            "Stopped session {}: {} frames captured, {} dropped, {} classified, {} stale, avg inference {:.0}us",
            active.id,
            metrics.frames_captured,
            metrics.frames_dropped,
            metrics.inferences_completed,
            metrics.stale_results,
            metrics.average_inference_us
        );
    }

    /// Switches to the other-facing camera. A failure leaves the session running
    /// without frames until [`restart_capture`](Self::restart_capture).
    pub async fn switch_camera(&mut self) -> Result<(), SessionError> {
        if self.active.is_none() {
            return Err(SessionError::NotStarted);
        }
        match self.frame_source.switch_camera().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = match e {
                    CameraError::SwitchFailed(_) => e,
                    other => CameraError::SwitchFailed(other.to_string()),
                };
                error!("Camera switch failed: {}", e);
                let _ = self.events_tx.send(SessionEvent::CameraFault(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Reopens capture on `camera` for the active session.
    pub async fn restart_capture(&mut self, camera: CameraPosition) -> Result<(), SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::NotStarted)?;
        active.pump_cancel.cancel();
        if let Some(pump) = active.pump.take() {
            if let Err(e) = pump.await {
                error!("Frame pump for session {} failed: {}", active.id, e);
            }
        }

        let stream = match open_camera(&mut self.frame_source, camera).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to restart capture on {} camera: {}", camera, e);
                let _ = self.events_tx.send(SessionEvent::CameraFault(e.clone()));
                return Err(e.into());
            }
        };

        active.pump_cancel = active.capture_cancel.child_token();
        active.pump = Some(tokio::spawn(pump_frames(
            stream,
            Arc::clone(&active.frame_slot),
            self.events_tx.clone(),
            Arc::clone(&self.metrics),
            active.pump_cancel.clone(),
        )));
        info!("Restarted capture on {} camera", camera);
        Ok(())
    }

    pub fn subscribe_feedback(&self) -> watch::Receiver<FeedbackSnapshot> {
        self.feedback_tx.subscribe()
    }

    pub fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn feedback(&self) -> FeedbackSnapshot {
        self.feedback_tx.borrow().clone()
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        *self.authorization_tx.borrow()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.frames_dropped = self.frame_source.dropped_frames();
        snapshot
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn target(&self) -> Option<&PoseLabel> {
        self.active.as_ref().map(|active| &active.target)
    }

    pub fn camera(&self) -> Option<CameraPosition> {
        self.frame_source.position()
    }

    pub fn catalog(&self) -> &dyn PoseCatalog {
        self.catalog.as_ref()
    }

    async fn resolve_authorization(&self) -> Result<(), SessionError> {
        let mut status = self.authorization.status();
        if status == CameraAuthorizationStatus::NotDetermined {
            self.authorization_tx
                .send_replace(AuthorizationState::AwaitingUser);
            let timeout = self.configuration.authorization.timeout();
            status = match tokio::time::timeout(timeout, self.authorization.request_access()).await
            {
                Ok(status) => status,
                Err(_) => {
                    warn!("Camera permission prompt unanswered after {:?}", timeout);
                    self.authorization_tx
                        .send_replace(AuthorizationState::Unresolved);
                    return Err(SessionError::AuthorizationUnresolved);
                }
            };
        }

        match status {
            CameraAuthorizationStatus::Authorized => {
                self.authorization_tx
                    .send_replace(AuthorizationState::Resolved(status));
                Ok(())
            }
            CameraAuthorizationStatus::NotDetermined => {
                self.authorization_tx
                    .send_replace(AuthorizationState::Unresolved);
                Err(SessionError::AuthorizationUnresolved)
            }
            denied => {
                warn!("Camera access {:?}", denied);
                self.authorization_tx
                    .send_replace(AuthorizationState::Resolved(denied));
                Err(SessionError::NotAuthorized(denied))
            }
        }
    }

    async fn send_command(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> WorkerCommand,
    ) -> Result<(), SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotStarted)?;
        let (responder, response) = oneshot::channel();
        active
            .command_tx
            .send(command(responder))
            .await
            .map_err(|_| lane_ended())?;
        response.await.map_err(|_| lane_ended())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

async fn open_camera(
    frame_source: &mut FrameSource,
    camera: CameraPosition,
) -> Result<FrameStream, CameraError> {
    frame_source.configure(camera).await?;
    match frame_source.start().await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            frame_source.stop().await;
            Err(e)
        }
    }
}

fn lane_ended() -> SessionError {
    SessionError::Inference(InferenceError::Interrupted(
        "inference lane has ended".to_string(),
    ))
}

/// Republishes authorization changes made in the host while a session runs.
async fn watch_authorization(
    mut status_rx: watch::Receiver<CameraAuthorizationStatus>,
    authorization_tx: Arc<watch::Sender<AuthorizationState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    status_rx.borrow_and_update();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                if !status.is_authorized() {
                    warn!("Camera authorization changed to {:?} during session", status);
                }
                authorization_tx.send_replace(AuthorizationState::Resolved(status));
                let _ = events_tx.send(SessionEvent::AuthorizationChanged(status));
            }
        }
    }
}

/// Assembles a [`SessionController`] from its collaborators.
pub struct SessionControllerBuilder {
    configuration: Configuration,
    catalog: Option<Arc<dyn PoseCatalog>>,
    authorization: Option<Arc<dyn AuthorizationProvider>>,
    camera_backend: Option<Arc<dyn CameraBackend>>,
    classifier: Option<Arc<dyn PoseClassifier>>,
}

impl SessionControllerBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            catalog: None,
            authorization: None,
            camera_backend: None,
            classifier: None,
        }
    }

    // Defaults to the built-in catalog when unset.
    pub fn catalog(mut self, catalog: Arc<dyn PoseCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn authorization(mut self, authorization: Arc<dyn AuthorizationProvider>) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn camera_backend(mut self, camera_backend: Arc<dyn CameraBackend>) -> Self {
        self.camera_backend = Some(camera_backend);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn PoseClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    // Sets the confidence needed for a match, this will override the default configuration.
    pub fn correct_threshold(mut self, correct_threshold: f32) -> Self {
        self.configuration.feedback.correct_threshold = correct_threshold;
        self
    }

    // Sets the misses before a tutorial is offered, this will override the default configuration.
    pub fn miss_streak_threshold(mut self, miss_streak_threshold: u32) -> Self {
        self.configuration.feedback.miss_streak_threshold = miss_streak_threshold;
        self
    }

    // Sets the minimum gap between tutorial prompts, this will override the default configuration.
    pub fn tutorial_cooldown(mut self, tutorial_cooldown: Duration) -> Self {
        self.configuration.feedback.tutorial_cooldown_ms = tutorial_cooldown.as_millis() as u64;
        self
    }

    // Sets the spacing between classifications, this will override the default configuration.
    pub fn sample_interval(mut self, sample_interval: Duration) -> Self {
        self.configuration.capture.sample_interval_ms = sample_interval.as_millis() as u64;
        self
    }

    // Adjusts the frame queue depth, this will override the default configuration.
    pub fn frame_queue_depth(mut self, frame_queue_depth: usize) -> Self {
        self.configuration.capture.frame_queue_depth = frame_queue_depth;
        self
    }

    // Sets the permission prompt wait, this will override the default configuration.
    pub fn authorization_timeout(mut self, authorization_timeout: Duration) -> Self {
        self.configuration.authorization.timeout_ms = authorization_timeout.as_millis() as u64;
        self
    }

    // Sets a per-frame classification deadline, this will override the default configuration.
    pub fn inference_timeout(mut self, inference_timeout: Duration) -> Self {
        self.configuration.inference.timeout_ms = Some(inference_timeout.as_millis() as u64);
        self
    }

    pub fn build(self) -> Result<SessionController, AppError> {
        self.configuration.validate()?;
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(StaticCatalog::builtin()));
        let authorization = self
            .authorization
            .ok_or(AppError::MissingComponent("authorization provider"))?;
        let camera_backend = self
            .camera_backend
            .ok_or(AppError::MissingComponent("camera backend"))?;
        let classifier = self
            .classifier
            .ok_or(AppError::MissingComponent("pose classifier"))?;
        Ok(SessionController::new(
            self.configuration,
            catalog,
            authorization,
            camera_backend,
            classifier,
        ))
    }
}
