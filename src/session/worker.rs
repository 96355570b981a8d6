use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SessionEvent, SessionMetrics};
use crate::camera::FrameStream;
use crate::common::Frame;
use crate::error::InferenceError;
use crate::feedback::{ClassificationOutcome, FeedbackSnapshot, FeedbackStateMachine};
use crate::inference::InferenceAdapter;

/// Requests the controller sends to the inference lane.
pub enum WorkerCommand {
    Pause { responder: oneshot::Sender<()> },
    Resume { responder: oneshot::Sender<()> },
}

/// The inference lane. Sole writer of the session's feedback state.
pub struct InferenceWorker {
    machine: FeedbackStateMachine,
    adapter: InferenceAdapter,
    frame_rx: watch::Receiver<Option<Frame>>,
    command_rx: mpsc::Receiver<WorkerCommand>,
    feedback_tx: Arc<watch::Sender<FeedbackSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
    metrics: Arc<SessionMetrics>,
    sample_interval: Duration,
    cancel: CancellationToken,
    // Cancelled when the lane can no longer use frames, so capture stops with it.
    capture_cancel: CancellationToken,
    paused: bool,
}

impl InferenceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: FeedbackStateMachine,
        adapter: InferenceAdapter,
        frame_rx: watch::Receiver<Option<Frame>>,
        command_rx: mpsc::Receiver<WorkerCommand>,
        feedback_tx: Arc<watch::Sender<FeedbackSnapshot>>,
        events_tx: broadcast::Sender<SessionEvent>,
        metrics: Arc<SessionMetrics>,
        sample_interval: Duration,
        cancel: CancellationToken,
        capture_cancel: CancellationToken,
    ) -> Self {
        Self {
            machine,
            adapter,
            frame_rx,
            command_rx,
            feedback_tx,
            events_tx,
            metrics,
            sample_interval,
            cancel,
            capture_cancel,
            paused: false,
        }
    }

    /// Runs until cancelled or the model becomes unusable, then hands the
    /// state machine back to the controller.
    pub async fn run(mut self) -> FeedbackStateMachine {
        self.machine.begin();
        self.publish();
        info!("Inference lane started for {}", self.machine.target());

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                changed = self.frame_rx.changed(), if !self.paused => {
                    if changed.is_err() {
                        debug!("Frame slot closed");
                        break;
                    }
                    let frame = self.frame_rx.borrow_and_update().clone();
                    let Some(frame) = frame else { continue };
                    if !self.evaluate(frame).await {
                        break;
                    }
                    // Space classifications out; frames keep landing in the slot meanwhile.
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.sample_interval) => {}
                    }
                }
            }
        }

        info!("Inference lane stopped for {}", self.machine.target());
        self.machine
    }

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Pause { responder } => {
                if !self.paused {
                    self.paused = true;
                    self.machine.suspend();
                    self.publish();
                    info!("Feedback paused");
                }
                let _ = responder.send(());
            }
            WorkerCommand::Resume { responder } => {
                if self.paused {
                    self.paused = false;
                    // Whatever sat in the slot predates the pause.
                    self.frame_rx.borrow_and_update();
                    self.machine.begin();
                    self.publish();
                    info!("Feedback resumed");
                }
                let _ = responder.send(());
            }
        }
    }

    /// Classifies one frame and applies the outcome. Returns false when the
    /// lane should end.
    async fn evaluate(&mut self, frame: Frame) -> bool {
        let sequence = frame.sequence();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.metrics.record_stale_result();
                return false;
            }
            result = self.adapter.classify(frame) => result,
        };
        if self.cancel.is_cancelled() {
            self.metrics.record_stale_result();
            return false;
        }

        match ClassificationOutcome::from_result(result) {
            Ok(outcome) => {
                if let Some(pose) = self.machine.apply(outcome, Instant::now()) {
                    self.metrics.record_tutorial_prompt();
                    let _ = self.events_tx.send(SessionEvent::SuggestTutorial { pose });
                }
                self.publish();
                true
            }
            Err(InferenceError::ModelUnavailable(reason)) => {
                error!("Pose model unavailable, ending inference lane: {}", reason);
                let _ = self.events_tx.send(SessionEvent::InferenceFault(
                    InferenceError::ModelUnavailable(reason),
                ));
                self.machine.stop();
                self.publish();
                self.capture_cancel.cancel();
                false
            }
            Err(e) => {
                warn!("Skipping frame {}: {}", sequence, e);
                true
            }
        }
    }

    fn publish(&self) {
        self.feedback_tx.send_replace(self.machine.snapshot());
    }
}

/// Moves frames from the capture stream into the latest-frame slot.
pub async fn pump_frames(
    mut stream: FrameStream,
    slot: Arc<watch::Sender<Option<Frame>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    metrics: Arc<SessionMetrics>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = stream.next_frame() => match frame {
                Some(frame) => {
                    metrics.record_capture();
                    slot.send_replace(Some(frame));
                }
                None => {
                    warn!("Frame stream ended");
                    let _ = events_tx.send(SessionEvent::CaptureEnded);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraPosition;
    use crate::catalog::PoseLabel;
    use crate::config::FeedbackConfig;
    use crate::feedback::FeedbackStatus;
    use crate::inference::{InferenceResult, PoseClassifier};
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::sync::Mutex;

    struct ScriptedClassifier(Mutex<Vec<Result<InferenceResult, InferenceError>>>);

    impl PoseClassifier for ScriptedClassifier {
        fn classify(&self, _frame: &Frame) -> Result<InferenceResult, InferenceError> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                Err(InferenceError::NoPersonDetected)
            } else {
                script.remove(0)
            }
        }
    }

    /// Records which frames reached the model.
    struct RecordingClassifier {
        delay: Duration,
        seen: Mutex<Vec<u64>>,
    }

    impl PoseClassifier for RecordingClassifier {
        fn classify(&self, frame: &Frame) -> Result<InferenceResult, InferenceError> {
            self.seen.lock().unwrap().push(frame.sequence());
            std::thread::sleep(self.delay);
            Ok(InferenceResult::single("tree", 0.9))
        }
    }

    struct Lane {
        slot: watch::Sender<Option<Frame>>,
        command_tx: mpsc::Sender<WorkerCommand>,
        feedback_rx: watch::Receiver<FeedbackSnapshot>,
        events_rx: broadcast::Receiver<SessionEvent>,
        cancel: CancellationToken,
        capture_cancel: CancellationToken,
        task: tokio::task::JoinHandle<FeedbackStateMachine>,
    }

    fn spawn_lane(script: Vec<Result<InferenceResult, InferenceError>>) -> Lane {
        spawn_lane_with(Arc::new(ScriptedClassifier(Mutex::new(script))))
    }

    fn spawn_lane_with(classifier: Arc<dyn PoseClassifier>) -> Lane {
        let metrics = Arc::new(SessionMetrics::new());
        let (slot, frame_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel(4);
        let (feedback_tx, feedback_rx) = watch::channel(FeedbackSnapshot::idle());
        let (events_tx, events_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let capture_cancel = cancel.child_token();
        let worker = InferenceWorker::new(
            FeedbackStateMachine::new(
                PoseLabel::new("tree"),
                FeedbackConfig::default(),
                Instant::now(),
            ),
            InferenceAdapter::new(classifier, None, metrics.clone()),
            frame_rx,
            command_rx,
            Arc::new(feedback_tx),
            events_tx,
            metrics,
            Duration::from_millis(1),
            cancel.clone(),
            capture_cancel.clone(),
        );
        Lane {
            slot,
            command_tx,
            feedback_rx,
            events_rx,
            cancel,
            capture_cancel,
            task: tokio::spawn(worker.run()),
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            sequence,
            CameraPosition::Front,
            DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(
                4,
                4,
                Rgb([0, 0, 0]),
            )),
        )
    }

    async fn wait_for_status(
        feedback_rx: &mut watch::Receiver<FeedbackSnapshot>,
        status: FeedbackStatus,
    ) -> FeedbackSnapshot {
        tokio::time::timeout(
            Duration::from_secs(2),
            feedback_rx.wait_for(|snapshot| snapshot.status == status),
        )
        .await
        .expect("status not reached")
        .expect("feedback channel closed")
        .clone()
    }

    #[tokio::test]
    async fn applies_classifications_from_the_slot() {
        let mut lane = spawn_lane(vec![Ok(InferenceResult::single("tree", 0.9))]);
        wait_for_status(&mut lane.feedback_rx, FeedbackStatus::Evaluating).await;

        lane.slot.send_replace(Some(frame(1)));
        let snapshot = wait_for_status(&mut lane.feedback_rx, FeedbackStatus::Correct).await;
        assert_eq!(snapshot.consecutive_hits, 1);

        lane.cancel.cancel();
        let machine = lane.task.await.unwrap();
        assert_eq!(machine.consecutive_hits(), 1);
    }

    #[tokio::test]
    async fn pause_publishes_idle_and_keeps_streaks() {
        let mut lane = spawn_lane(vec![Ok(InferenceResult::single("plank", 0.9))]);
        lane.slot.send_replace(Some(frame(1)));
        wait_for_status(&mut lane.feedback_rx, FeedbackStatus::NeedsAdjustment).await;

        let (responder, response) = oneshot::channel();
        lane.command_tx
            .send(WorkerCommand::Pause { responder })
            .await
            .unwrap();
        response.await.unwrap();
        let snapshot = lane.feedback_rx.borrow().clone();
        assert_eq!(snapshot.status, FeedbackStatus::Idle);
        assert_eq!(snapshot.consecutive_misses, 1);

        let (responder, response) = oneshot::channel();
        lane.command_tx
            .send(WorkerCommand::Resume { responder })
            .await
            .unwrap();
        response.await.unwrap();
        assert_eq!(lane.feedback_rx.borrow().status, FeedbackStatus::Evaluating);
        assert_eq!(lane.feedback_rx.borrow().consecutive_misses, 1);

        lane.cancel.cancel();
        lane.task.await.unwrap();
    }

    #[tokio::test]
    async fn model_failure_ends_the_lane() {
        let mut lane = spawn_lane(vec![Err(InferenceError::ModelUnavailable(
            "weights missing".to_string(),
        ))]);
        lane.slot.send_replace(Some(frame(1)));

        let machine = tokio::time::timeout(Duration::from_secs(2), lane.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(machine.status(), FeedbackStatus::Idle);
        assert_eq!(lane.feedback_rx.borrow().status, FeedbackStatus::Idle);
        assert!(matches!(
            lane.events_rx.recv().await.unwrap(),
            SessionEvent::InferenceFault(InferenceError::ModelUnavailable(_))
        ));
        assert!(lane.capture_cancel.is_cancelled());
        assert!(!lane.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn frames_arriving_mid_classification_collapse_to_the_latest() {
        let classifier = Arc::new(RecordingClassifier {
            delay: Duration::from_millis(100),
            seen: Mutex::new(Vec::new()),
        });
        let lane = spawn_lane_with(classifier.clone());

        lane.slot.send_replace(Some(frame(0)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        for sequence in 1..=5 {
            lane.slot.send_replace(Some(frame(sequence)));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while classifier.seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        lane.cancel.cancel();
        lane.task.await.unwrap();

        let seen = classifier.seen.lock().unwrap().clone();
        assert_eq!(&seen[..2], &[0, 5]);
    }

    #[tokio::test]
    async fn tutorial_event_after_miss_streak() {
        let script = (0..8)
            .map(|_| Ok(InferenceResult::single("plank", 0.9)))
            .collect();
        let mut lane = spawn_lane(script);
        for sequence in 0..8 {
            lane.slot.send_replace(Some(frame(sequence)));
            let misses = (sequence + 1) as u32 % 8;
            tokio::time::timeout(
                Duration::from_secs(2),
                lane.feedback_rx.wait_for(|snapshot| {
                    snapshot.status == FeedbackStatus::NeedsAdjustment
                        && snapshot.consecutive_misses == misses
                        && (misses != 0 || snapshot.last_tutorial_prompt_at.is_some())
                }),
            )
            .await
            .unwrap()
            .unwrap();
        }
        assert_eq!(
            lane.events_rx.recv().await.unwrap(),
            SessionEvent::SuggestTutorial {
                pose: PoseLabel::new("tree")
            }
        );
        lane.cancel.cancel();
        lane.task.await.unwrap();
    }
}
