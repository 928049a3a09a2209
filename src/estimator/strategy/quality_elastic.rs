//! Quality-elastic strategy.
//!
//! Composes the update-risk strategy with a risk parameter derived from
//! current response-time metrics: the closer the 95th-percentile response
//! time gets to the SLO, the more staleness risk we accept in exchange for
//! longer cache validity (and thus less upstream load).

use std::time::Duration;

use tracing::info;

use super::update_risk::UpdateRiskStrategy;
use super::{EstimationStrategy, StrategyContext};
use crate::estimator::history::Observation;

/// Default dampening applied to the p95/SLO fraction.
pub const DEFAULT_DAMPENING: f64 = 0.1;

/// Default SLO when none is configured.
pub const DEFAULT_SLO: Duration = Duration::from_millis(100);

/// Lower bound on the derived update risk.
pub const RHO_FLOOR: f64 = 0.01;

/// Upper bound on the derived update risk; 1.0 would make the TTL diverge.
pub const RHO_CEILING: f64 = 0.99;

/// Update-risk with `rho = clamp(p95/SLO * dampening, floor, ceiling)`.
pub struct QualityElasticStrategy {
    slo: Duration,
    dampening: f64,
    inner: UpdateRiskStrategy,
}

impl QualityElasticStrategy {
    pub fn new(slo: Duration) -> Self {
        Self {
            slo,
            dampening: DEFAULT_DAMPENING,
            inner: UpdateRiskStrategy::new(0.0),
        }
    }

    /// Override the dampening factor.
    pub fn with_dampening(mut self, dampening: f64) -> Self {
        self.dampening = dampening;
        self
    }

    fn update_risk(&self, p95: Option<Duration>) -> f64 {
        let p95 = p95.unwrap_or(Duration::ZERO);
        let fraction = p95.as_secs_f64() / self.slo.as_secs_f64();
        (fraction * self.dampening).clamp(RHO_FLOOR, RHO_CEILING)
    }
}

impl EstimationStrategy for QualityElasticStrategy {
    fn initialize(&mut self) {
        if self.dampening <= 1e-4 {
            self.dampening = DEFAULT_DAMPENING;
        }
        if self.slo.is_zero() {
            self.slo = DEFAULT_SLO;
        }
        info!(
            slo_ms = self.slo.as_millis() as u64,
            dampening = self.dampening,
            "using quality-elastic strategy"
        );
        self.inner.initialize();
    }

    fn observe(&mut self, observation: &Observation) {
        self.inner.observe(observation);
    }

    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        let rho = self.update_risk(cx.p95_response_time);
        self.inner.set_rho(rho);
        self.inner.estimate(cx)
    }

    fn interval(&mut self, cx: &StrategyContext<'_>) -> Option<Duration> {
        self.inner.interval(cx)
    }
}
