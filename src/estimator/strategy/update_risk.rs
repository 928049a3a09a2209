//! Update-risk based strategy.
//!
//! Embodies Lee et al., "An Update-Risk Based Approach to TTL Estimation
//! in Web Caching" (2002), <https://doi.org/10.1109/WISE.2002.1181640>.
//!
//! The update frequency `mu` is estimated from the backwards K-update
//! distance over the observation history; the TTL is the time for which
//! the probability of serving a stale value stays below `rho`.

use std::time::Duration;

use tracing::{debug, info};

use super::{bounded_interval, EstimationStrategy, StrategyContext};
use crate::estimator::history::backwards_update_distance;

/// K = 2 is the optimum found by the paper.
pub const DEFAULT_K: usize = 2;

/// TTL = `(-1 / mu) * ln(1 - rho)`.
pub struct UpdateRiskStrategy {
    rho: f64,
    k: usize,
}

impl UpdateRiskStrategy {
    pub fn new(rho: f64) -> Self {
        Self { rho, k: DEFAULT_K }
    }

    /// Override K, the number of past updates the frequency estimate uses.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    /// Replace the acceptable staleness risk. Used by the quality-elastic
    /// strategy, which recomputes rho per estimation.
    pub(crate) fn set_rho(&mut self, rho: f64) {
        self.rho = rho;
    }

    fn average_update_frequency(&self, cx: &StrategyContext<'_>) -> f64 {
        let timestamps = backwards_update_distance(cx.history.observations(), self.k);
        let Some(oldest) = timestamps.last() else {
            debug!("no observed value updates yet, using 1.0 as update frequency");
            return 1.0;
        };

        // We asked for K updates back but may have gotten fewer, so rely
        // on what the history actually held.
        let timespan = cx.now.saturating_duration_since(*oldest);
        timestamps.len() as f64 / timespan.as_secs_f64()
    }
}

impl EstimationStrategy for UpdateRiskStrategy {
    fn initialize(&mut self) {
        info!(rho = self.rho, k = self.k, "using update-risk based strategy");
    }

    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        let mu = self.average_update_frequency(cx);
        let ttl_secs = -1.0 / mu * (1.0 - self.rho).ln();
        // rho at or above 1 diverges; the façade clamps at header time.
        Some(Duration::try_from_secs_f64(ttl_secs.max(0.0)).unwrap_or(Duration::MAX))
    }

    fn interval(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        Some(bounded_interval(
            cx.history.last_estimate().map(|e| e.validity),
        ))
    }
}
