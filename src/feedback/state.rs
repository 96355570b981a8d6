use std::time::Instant;

use crate::catalog::PoseLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackStatus {
    Idle,
    Evaluating,
    Correct,
    NeedsAdjustment,
    NoPersonDetected,
}

impl FeedbackStatus {
    /// User-facing text for this status.
    pub fn message(self) -> &'static str {
        match self {
            FeedbackStatus::Idle => "Ready",
            FeedbackStatus::Evaluating => "Analyzing pose...",
            FeedbackStatus::Correct => "Great! Keep holding the pose",
            FeedbackStatus::NeedsAdjustment => "Adjust your position",
            FeedbackStatus::NoPersonDetected => "Move into frame",
        }
    }

    pub fn is_active(self) -> bool {
        self != FeedbackStatus::Idle
    }
}

/// Read-only copy of the feedback state published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSnapshot {
    pub target: Option<PoseLabel>,
    pub status: FeedbackStatus,
    pub consecutive_hits: u32,
    pub consecutive_misses: u32,
    pub session_started_at: Option<Instant>,
    pub last_tutorial_prompt_at: Option<Instant>,
}

impl FeedbackSnapshot {
    pub fn idle() -> Self {
        Self {
            target: None,
            status: FeedbackStatus::Idle,
            consecutive_hits: 0,
            consecutive_misses: 0,
            session_started_at: None,
            last_tutorial_prompt_at: None,
        }
    }

    pub fn message(&self) -> &'static str {
        self.status.message()
    }
}

impl Default for FeedbackSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
