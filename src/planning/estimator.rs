//! Heuristic task duration estimator with online calibration
//!
//! Baseline from size signals (file count, description length, test
//! verbs), multiplied by a calibration factor learned from completed
//! tasks: an exponentially weighted running mean of actual/estimated
//! ratios, clamped to a sane range.

use std::sync::Mutex;

use tracing::debug;

use crate::domain::Task;

/// Calibration bounds; a wildly wrong run must not poison the model
const CALIBRATION_MIN: f64 = 0.25;
const CALIBRATION_MAX: f64 = 4.0;

/// Verbs that signal test-writing work
const TEST_VERBS: [&str; 4] = ["test", "verify", "assert", "cover"];

/// Per-task duration estimates
pub struct TimeEstimator {
    /// EWMA of actual/estimated ratios
    calibration: Mutex<f64>,

    /// EWMA smoothing factor
    alpha: f64,
}

impl TimeEstimator {
    pub fn new() -> Self {
        Self {
            calibration: Mutex::new(1.0),
            alpha: 0.3,
        }
    }

    /// Estimate a task's duration in minutes
    pub fn estimate(&self, task: &Task) -> u32 {
        let baseline = Self::baseline(task);
        let calibration = *self.calibration.lock().unwrap_or_else(|p| p.into_inner());
        let minutes = (baseline * calibration).round() as u32;
        minutes.max(1)
    }

    /// Size-signal baseline in minutes
    fn baseline(task: &Task) -> f64 {
        let mut minutes = 5.0;
        minutes += task.files.len() as f64 * 5.0;
        minutes += task.description.len() as f64 / 200.0;

        let lower = format!("{} {}", task.title, task.description).to_lowercase();
        if TEST_VERBS.iter().any(|verb| lower.contains(verb)) {
            minutes += 10.0;
        }

        minutes
    }

    /// Feed back a completed task's actual duration
    pub fn record_outcome(&self, estimated_minutes: u32, actual_minutes: f64) {
        if estimated_minutes == 0 || actual_minutes <= 0.0 {
            return;
        }
        let ratio = (actual_minutes / estimated_minutes as f64).clamp(CALIBRATION_MIN, CALIBRATION_MAX);

        let mut calibration = self.calibration.lock().unwrap_or_else(|p| p.into_inner());
        *calibration = (1.0 - self.alpha) * *calibration + self.alpha * ratio;
        *calibration = calibration.clamp(CALIBRATION_MIN, CALIBRATION_MAX);
        debug!(ratio, calibration = *calibration, "Estimator calibration updated");
    }

    /// Current calibration multiplier
    pub fn calibration(&self) -> f64 {
        *self.calibration.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self::new()
    }
}
