use std::time::Instant;
use tracing::{debug, info, warn};

/// Tracks the per-question phase of a run.
pub struct QaProgress {
    total: usize,
    succeeded: usize,
    failed: usize,
    success_seconds: f64,
    started_at: Instant,
}

impl QaProgress {
    pub fn new(total: usize) -> Self {
        info!(total, "Starting Q&A phase");
        Self {
            total,
            succeeded: 0,
            failed: 0,
            success_seconds: 0.0,
            started_at: Instant::now(),
        }
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed() as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
    }

    pub fn record_success(&mut self, seconds: f64) {
        self.succeeded += 1;
        self.success_seconds += seconds;
        debug!(
            completed = self.completed(),
            total = self.total,
            seconds = %format!("{seconds:.2}"),
            percent = %format!("{:.0}", self.progress_percent()),
            "Question answered"
        );
    }

    pub fn record_failure(&mut self, seconds: f64, error: &str) {
        self.failed += 1;
        warn!(
            completed = self.completed(),
            total = self.total,
            seconds = %format!("{seconds:.2}"),
            error,
            "Question failed"
        );
    }

    pub fn total_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Mean over successful questions only; 0 when none succeeded.
    pub fn avg_success_seconds(&self) -> f64 {
        if self.succeeded == 0 {
            0.0
        } else {
            self.success_seconds / self.succeeded as f64
        }
    }
}
