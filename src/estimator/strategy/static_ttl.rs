//! Fixed-TTL strategy.

use std::time::Duration;

use tracing::info;

use super::{EstimationStrategy, StrategyContext};

/// Returns the configured TTL for every response and never asks to sample.
pub struct StaticStrategy {
    ttl: Duration,
}

impl StaticStrategy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl EstimationStrategy for StaticStrategy {
    fn initialize(&mut self) {
        info!(
            ttl_secs = self.ttl.as_secs(),
            "using static TTL for all non-blacklisted responses"
        );
    }

    fn estimate(&mut self, _cx: &StrategyContext<'_>) -> Option<Duration> {
        Some(self.ttl)
    }

    fn interval(&mut self, _cx: &StrategyContext<'_>) -> Option<Duration> {
        // Static does not concern itself with verification intervals.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::history::History;
    use std::time::Instant;

    #[test]
    fn estimate_is_always_configured_ttl() {
        let mut strategy = StaticStrategy::new(Duration::from_secs(10));
        let history = History::new();
        let cx = StrategyContext {
            now: Instant::now(),
            history: &history,
            p95_response_time: None,
        };
        assert_eq!(strategy.estimate(&cx), Some(Duration::from_secs(10)));
        assert_eq!(strategy.interval(&cx), None);
    }
}
