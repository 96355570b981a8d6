use std::time::Instant;
use tracing::{debug, info, trace};

use super::state::{FeedbackSnapshot, FeedbackStatus};
use crate::catalog::PoseLabel;
use crate::config::FeedbackConfig;
use crate::error::InferenceError;
use crate::inference::InferenceResult;

/// What the classifier said about one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Detected(InferenceResult),
    NoPersonDetected,
}

impl ClassificationOutcome {
    /// Folds per-frame conditions into an outcome; anything else stays an error.
    pub fn from_result(
        result: Result<InferenceResult, InferenceError>,
    ) -> Result<Self, InferenceError> {
        match result {
            Ok(result) if result.is_empty() => Ok(ClassificationOutcome::NoPersonDetected),
            Ok(result) => Ok(ClassificationOutcome::Detected(result)),
            Err(InferenceError::NoPersonDetected) => Ok(ClassificationOutcome::NoPersonDetected),
            Err(e) => Err(e),
        }
    }
}

/// Debounced pose feedback for one practice session.
///
/// Hits and misses are counted consecutively so that a single noisy frame cannot
/// flip the feedback. After `miss_streak_threshold` misses in a row a tutorial is
/// suggested, at most once per cool-down window.
#[derive(Debug, Clone)]
pub struct FeedbackStateMachine {
    config: FeedbackConfig,
    target: PoseLabel,
    status: FeedbackStatus,
    consecutive_hits: u32,
    consecutive_misses: u32,
    session_started_at: Instant,
    last_tutorial_prompt_at: Option<Instant>,
}

impl FeedbackStateMachine {
    pub fn new(target: PoseLabel, config: FeedbackConfig, session_started_at: Instant) -> Self {
        Self {
            config,
            target,
            status: FeedbackStatus::Idle,
            consecutive_hits: 0,
            consecutive_misses: 0,
            session_started_at,
            last_tutorial_prompt_at: None,
        }
    }

    pub fn target(&self) -> &PoseLabel {
        &self.target
    }

    pub fn status(&self) -> FeedbackStatus {
        self.status
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Enters the evaluation loop. Streaks survive a suspend/begin cycle.
    pub fn begin(&mut self) {
        if self.status == FeedbackStatus::Idle {
            self.status = FeedbackStatus::Evaluating;
        }
    }

    /// Leaves the evaluation loop without forgetting streaks.
    pub fn suspend(&mut self) {
        self.status = FeedbackStatus::Idle;
    }

    /// Ends the session's evaluation.
    pub fn stop(&mut self) {
        self.status = FeedbackStatus::Idle;
        self.consecutive_hits = 0;
        self.consecutive_misses = 0;
    }

    /// Applies one classification. Returns the pose to offer a tutorial for when
    /// the miss streak fires the prompt.
    pub fn apply(&mut self, outcome: ClassificationOutcome, now: Instant) -> Option<PoseLabel> {
        if self.status == FeedbackStatus::Idle {
            trace!("Ignoring classification while idle");
            return None;
        }

        let (label, confidence) = match &outcome {
            ClassificationOutcome::NoPersonDetected => {
                self.status = FeedbackStatus::NoPersonDetected;
                self.consecutive_hits = 0;
                return None;
            }
            ClassificationOutcome::Detected(result) => match result.top() {
                Some(top) => (&top.label, top.confidence),
                None => {
                    self.status = FeedbackStatus::NoPersonDetected;
                    self.consecutive_hits = 0;
                    return None;
                }
            },
        };

        if *label == self.target && confidence >= self.config.correct_threshold {
            self.status = FeedbackStatus::Correct;
            self.consecutive_hits += 1;
            self.consecutive_misses = 0;
            return None;
        }

        debug!(
            "Pose mismatch: saw {} ({:.2}), want {}",
            label, confidence, self.target
        );
        self.status = FeedbackStatus::NeedsAdjustment;
        self.consecutive_hits = 0;
        self.consecutive_misses += 1;

        if self.consecutive_misses >= self.config.miss_streak_threshold
            && self.cooldown_elapsed(now)
        {
            info!(
                "Suggesting tutorial for {} after {} consecutive misses",
                self.target, self.consecutive_misses
            );
            self.last_tutorial_prompt_at = Some(now);
            self.consecutive_misses = 0;
            return Some(self.target.clone());
        }
        None
    }

    pub fn snapshot(&self) -> FeedbackSnapshot {
        FeedbackSnapshot {
            target: Some(self.target.clone()),
            status: self.status,
            consecutive_hits: self.consecutive_hits,
            consecutive_misses: self.consecutive_misses,
            session_started_at: Some(self.session_started_at),
            last_tutorial_prompt_at: self.last_tutorial_prompt_at,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_tutorial_prompt_at
            .map(|last| now.saturating_duration_since(last) >= self.config.tutorial_cooldown())
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn machine(target: &str) -> (FeedbackStateMachine, Instant) {
        let start = Instant::now();
        let mut machine =
            FeedbackStateMachine::new(PoseLabel::new(target), FeedbackConfig::default(), start);
        machine.begin();
        (machine, start)
    }

    fn seen(label: &str, confidence: f32) -> ClassificationOutcome {
        ClassificationOutcome::Detected(InferenceResult::single(label, confidence))
    }

    #[test]
    fn starts_idle_and_ignores_results_until_begun() {
        let start = Instant::now();
        let mut machine =
            FeedbackStateMachine::new(PoseLabel::new("tree"), FeedbackConfig::default(), start);
        assert_eq!(machine.status(), FeedbackStatus::Idle);
        machine.apply(seen("tree", 0.9), start);
        assert_eq!(machine.status(), FeedbackStatus::Idle);
        assert_eq!(machine.consecutive_hits(), 0);

        machine.begin();
        assert_eq!(machine.status(), FeedbackStatus::Evaluating);
    }

    #[test]
    fn confident_matches_are_correct_and_never_miss() {
        let (mut machine, start) = machine("tree");
        for i in 0..20 {
            let fired = machine.apply(seen("tree", 0.70 + (i as f32) * 0.01), start);
            assert!(fired.is_none());
            assert_eq!(machine.status(), FeedbackStatus::Correct);
            assert_eq!(machine.consecutive_misses(), 0);
        }
        assert_eq!(machine.consecutive_hits(), 20);
    }

    #[test]
    fn low_confidence_match_counts_as_miss() {
        let (mut machine, start) = machine("tree");
        machine.apply(seen("tree", 0.69), start);
        assert_eq!(machine.status(), FeedbackStatus::NeedsAdjustment);
        assert_eq!(machine.consecutive_misses(), 1);
    }

    #[test]
    fn eight_misses_fire_exactly_one_tutorial() {
        let (mut machine, start) = machine("tree");
        let mut fired = Vec::new();
        for i in 0..8 {
            let now = start + Duration::from_millis(i);
            if let Some(pose) = machine.apply(seen("plank", 0.9), now) {
                fired.push(pose);
            }
        }
        assert_eq!(fired, vec![PoseLabel::new("tree")]);
        assert_eq!(machine.consecutive_misses(), 0);
    }

    #[test]
    fn plank_streak_then_tree_scenario() {
        let (mut machine, start) = machine("tree");
        let mut fired = 0;
        for _ in 0..8 {
            if machine.apply(seen("plank", 0.9), start).is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(machine.consecutive_misses(), 0);

        assert!(machine.apply(seen("tree", 0.95), start).is_none());
        assert_eq!(machine.status(), FeedbackStatus::Correct);
        assert_eq!(machine.consecutive_hits(), 1);
        assert_eq!(machine.consecutive_misses(), 0);
    }

    #[test]
    fn seven_misses_then_hit_fire_nothing() {
        let (mut machine, start) = machine("tree");
        for _ in 0..7 {
            assert!(machine.apply(seen("plank", 0.9), start).is_none());
        }
        assert!(machine.apply(seen("tree", 0.95), start).is_none());
        assert_eq!(machine.consecutive_hits(), 1);
        assert_eq!(machine.consecutive_misses(), 0);
    }

    #[test]
    fn alternating_hits_reset_the_miss_streak() {
        let (mut machine, start) = machine("warrior2");
        for _ in 0..4 {
            assert!(machine.apply(seen("warrior2", 0.8), start).is_none());
            assert!(machine.apply(seen("plank", 0.5), start).is_none());
        }
        assert_eq!(machine.consecutive_misses(), 1);
        assert!(machine.snapshot().last_tutorial_prompt_at.is_none());
    }

    #[test]
    fn cooldown_suppresses_second_prompt() {
        let (mut machine, start) = machine("tree");
        let mut prompts = 0;
        // 30 misses over ~30 seconds, well inside the 60s cool-down
        for i in 0..30 {
            if machine
                .apply(seen("plank", 0.9), start + Duration::from_secs(i))
                .is_some()
            {
                prompts += 1;
            }
        }
        assert_eq!(prompts, 1);
        assert_eq!(machine.consecutive_misses(), 22);
    }

    #[test]
    fn prompt_fires_again_after_cooldown() {
        let (mut machine, start) = machine("tree");
        for _ in 0..8 {
            machine.apply(seen("plank", 0.9), start);
        }
        for _ in 0..10 {
            assert!(machine
                .apply(seen("plank", 0.9), start + Duration::from_secs(30))
                .is_none());
        }
        let later = start + Duration::from_secs(60);
        assert_eq!(
            machine.apply(seen("plank", 0.9), later),
            Some(PoseLabel::new("tree"))
        );
        assert_eq!(machine.snapshot().last_tutorial_prompt_at, Some(later));
        assert_eq!(machine.consecutive_misses(), 0);
    }

    #[test]
    fn no_person_never_counts_as_miss() {
        let (mut machine, start) = machine("tree");
        machine.apply(seen("plank", 0.9), start);
        machine.apply(seen("tree", 0.9), start);
        for _ in 0..50 {
            assert!(machine
                .apply(ClassificationOutcome::NoPersonDetected, start)
                .is_none());
        }
        assert_eq!(machine.status(), FeedbackStatus::NoPersonDetected);
        assert_eq!(machine.consecutive_misses(), 0);
        assert_eq!(machine.consecutive_hits(), 0);
    }

    #[test]
    fn no_person_keeps_existing_miss_streak() {
        let (mut machine, start) = machine("tree");
        for _ in 0..5 {
            machine.apply(seen("plank", 0.9), start);
        }
        machine.apply(ClassificationOutcome::NoPersonDetected, start);
        assert_eq!(machine.consecutive_misses(), 5);
    }

    #[test]
    fn unknown_labels_never_match() {
        let (mut machine, start) = machine("tree");
        machine.apply(seen("Tree", 1.0), start);
        assert_eq!(machine.status(), FeedbackStatus::NeedsAdjustment);
    }

    #[test]
    fn suspend_preserves_streaks_and_stop_clears_them() {
        let (mut machine, start) = machine("tree");
        for _ in 0..3 {
            machine.apply(seen("plank", 0.9), start);
        }
        machine.suspend();
        assert_eq!(machine.status(), FeedbackStatus::Idle);
        assert_eq!(machine.consecutive_misses(), 3);

        machine.begin();
        machine.apply(seen("plank", 0.9), start);
        assert_eq!(machine.consecutive_misses(), 4);

        machine.stop();
        assert_eq!(machine.status(), FeedbackStatus::Idle);
        assert_eq!(machine.consecutive_misses(), 0);
    }

    #[test]
    fn outcome_from_result_folds_per_frame_conditions() {
        assert_eq!(
            ClassificationOutcome::from_result(Err(InferenceError::NoPersonDetected)),
            Ok(ClassificationOutcome::NoPersonDetected)
        );
        assert_eq!(
            ClassificationOutcome::from_result(Ok(InferenceResult::default())),
            Ok(ClassificationOutcome::NoPersonDetected)
        );
        assert_eq!(
            ClassificationOutcome::from_result(Err(InferenceError::ModelUnavailable(
                "gone".to_string()
            ))),
            Err(InferenceError::ModelUnavailable("gone".to_string()))
        );
    }
}
