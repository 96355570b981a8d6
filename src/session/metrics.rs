use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

const ALPHA: f32 = 0.1; // EWMA smoothing factor

#[derive(Debug, Default)]
struct LatencyStats {
    samples: u64,
    average_us: f32,
    max_us: u64,
    last_us: u64,
}

/// Counters for one controller, shared between the lanes.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    frames_captured: AtomicU64,
    inferences_completed: AtomicU64,
    inference_failures: AtomicU64,
    stale_results: AtomicU64,
    tutorial_prompts: AtomicU64,
    latency: Mutex<LatencyStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub inferences_completed: u64,
    pub inference_failures: u64,
    pub stale_results: u64,
    pub tutorial_prompts: u64,
    pub average_inference_us: f32,
    pub max_inference_us: u64,
    pub last_inference_us: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one classifier call. Failures still count towards latency.
    pub fn record_inference(&self, duration_us: u64, ok: bool) {
        if ok {
            self.inferences_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inference_failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut latency) = self.latency.lock() {
            latency.average_us = if latency.samples == 0 {
                duration_us as f32
            } else {
                update_ewma(latency.average_us, duration_us, ALPHA)
            };
            latency.samples += 1;
            latency.max_us = latency.max_us.max(duration_us);
            latency.last_us = duration_us;
        }
    }

    /// A result arrived after its session was cancelled and was thrown away.
    pub fn record_stale_result(&self) {
        let stale = self.stale_results.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Discarded stale classification ({} so far)", stale);
    }

    pub fn record_tutorial_prompt(&self) {
        self.tutorial_prompts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            inferences_completed: self.inferences_completed.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            tutorial_prompts: self.tutorial_prompts.load(Ordering::Relaxed),
            ..MetricsSnapshot::default()
        };
        if let Ok(latency) = self.latency.lock() {
            snapshot.average_inference_us = latency.average_us;
            snapshot.max_inference_us = latency.max_us;
            snapshot.last_inference_us = latency.last_us;
        }
        snapshot
    }
}

fn update_ewma(current: f32, new_value: u64, alpha: f32) -> f32 {
    current * (1.0 - alpha) + new_value as f32 * alpha
}
