//! Adaptive-TTL strategy.
//!
//! The longer a value has been observed unchanged, the longer it is
//! predicted to stay unchanged; `alpha` dampens the extrapolation.

use std::time::{Duration, Instant};

use tracing::info;

use super::{bounded_interval, EstimationStrategy, StrategyContext};
use crate::estimator::history::Observation;

/// TTL = `alpha * (now - last observed change)`.
pub struct AdaptiveStrategy {
    alpha: f64,
    last_modification: Option<Instant>,
    last_digest: Option<u64>,
}

impl AdaptiveStrategy {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            last_modification: None,
            last_digest: None,
        }
    }
}

impl EstimationStrategy for AdaptiveStrategy {
    fn initialize(&mut self) {
        info!(alpha = self.alpha, "using adaptive TTL strategy");
    }

    fn observe(&mut self, observation: &Observation) {
        if self.last_digest != Some(observation.digest) {
            self.last_modification = Some(observation.timestamp);
            self.last_digest = Some(observation.digest);
        }
    }

    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        let last_modification = self.last_modification?;
        let unchanged = cx.now.saturating_duration_since(last_modification);
        let ttl_secs = unchanged.as_secs_f64() * self.alpha.max(0.0);
        Some(Duration::try_from_secs_f64(ttl_secs).unwrap_or(Duration::MAX))
    }

    fn interval(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        Some(bounded_interval(
            cx.history.last_estimate().map(|e| e.validity),
        ))
    }
}
