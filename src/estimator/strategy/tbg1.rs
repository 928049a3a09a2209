//! TBG1 strategy: EWMA over inter-change intervals.
//!
//! Tracks the time between *changes* of the response value. The first
//! observation counts as a change (from nothing); once a second change
//! arrives, their distance seeds an exponentially-weighted moving average
//! that subsequent changes refine. Sampling honours the Nyquist criterion:
//! verify twice as fast as the observed change frequency.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{EstimationStrategy, StrategyContext};
use crate::estimator::history::Observation;

/// EWMA smoothing factor for inter-change intervals.
pub const SMOOTHING: f64 = 0.1;

/// Floor on the sampling interval.
pub const MINIMUM_SAMPLING_INTERVAL: Duration = Duration::from_millis(250);

/// Quantization grid for emitted sampling intervals.
const INTERVAL_GRID_SECS: f64 = 0.5;

/// Round `x` to the nearest multiple of `unit`.
fn round_to(x: f64, unit: f64) -> f64 {
    (x / unit).round() * unit
}

/// Estimates validity as a smoothed inter-change interval.
pub struct Tbg1Strategy {
    // Raw EWMA state in seconds; quantization happens only on output.
    estimate_secs: f64,
    previous: Option<(u64, Instant)>,
    changes: u32,
}

impl Tbg1Strategy {
    pub fn new() -> Self {
        Self {
            estimate_secs: 0.0,
            previous: None,
            changes: 0,
        }
    }
}

impl Default for Tbg1Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl EstimationStrategy for Tbg1Strategy {
    fn initialize(&mut self) {
        info!("using tbg1 strategy");
    }

    fn observe(&mut self, observation: &Observation) {
        let changed = match self.previous {
            Some((digest, _)) => digest != observation.digest,
            None => true,
        };
        if !changed {
            return;
        }

        if let Some((_, previous_timestamp)) = self.previous {
            let delta = observation
                .timestamp
                .saturating_duration_since(previous_timestamp)
                .as_secs_f64();
            if self.changes == 1 {
                // Two changes seen: their distance seeds the average.
                self.estimate_secs = delta;
            } else {
                self.estimate_secs = (1.0 - SMOOTHING) * self.estimate_secs + SMOOTHING * delta;
            }
        }

        self.changes = self.changes.saturating_add(1);
        self.previous = Some((observation.digest, observation.timestamp));
        debug!(estimate_secs = self.estimate_secs, changes = self.changes, "inter-change estimate updated");
    }

    fn estimate(&mut self, _cx: &StrategyContext<'_>) -> Option<Duration> {
        Some(Duration::from_secs_f64(round_to(self.estimate_secs, 1.0)))
    }

    fn interval(&mut self, _cx: &StrategyContext<'_>) -> Option<Duration> {
        if self.changes == 0 {
            // Not quite yet.
            return None;
        }
        let half = round_to(self.estimate_secs / 2.0, INTERVAL_GRID_SECS);
        let secs = half.max(MINIMUM_SAMPLING_INTERVAL.as_secs_f64());
        Some(Duration::from_secs_f64(secs))
    }
}
