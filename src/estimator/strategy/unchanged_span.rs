//! Unchanged-span strategies.
//!
//! Both variants claim the TTL is half the span covered by the longest
//! suffix of observations whose replies equal the most recent one. They
//! differ only in how they schedule the next sample.

use std::time::Duration;

use tracing::info;

use super::{EstimationStrategy, StrategyContext};
use crate::estimator::DEFAULT_INTERVAL;

/// Sampling interval for [`NyqvistishStrategy`] before any estimate exists.
pub const NYQVISTISH_BOOTSTRAP_INTERVAL: Duration = Duration::from_secs(1);

/// Half the unchanged span; samples as often as the estimate itself.
pub struct NyqvistishStrategy;

impl EstimationStrategy for NyqvistishStrategy {
    fn initialize(&mut self) {
        info!("using nyqvist-ish strategy");
    }

    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        cx.history.last_observation()?;
        Some(cx.history.unchanged_span() / 2)
    }

    fn interval(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        match cx.history.last_estimate() {
            Some(estimate) => Some(estimate.validity),
            None => Some(NYQVISTISH_BOOTSTRAP_INTERVAL),
        }
    }
}

/// Half the unchanged span; samples at a fixed default interval.
///
/// Also the fallback strategy for unrecognized dynamic configurations.
pub struct SimplisticStrategy;

impl EstimationStrategy for SimplisticStrategy {
    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        cx.history.last_observation()?;
        Some(cx.history.unchanged_span() / 2)
    }

    fn interval(&mut self, _cx: &StrategyContext<'_>) -> Option<Duration> {
        Some(DEFAULT_INTERVAL)
    }
}
