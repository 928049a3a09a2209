//! Estimation strategies.
//!
//! A strategy turns the history of observed responses into two predictions:
//! how long the current response will stay valid, and how long the owning
//! verifier should wait before sampling again. The verifier owns the
//! histories and mediates all access; strategies keep only the distilled
//! state they need (digests, change timestamps, moving averages).
//!
//! # Contract
//!
//! - [`EstimationStrategy::observe`] is called once per observation, in
//!   append order, before `estimate`/`interval` for that observation.
//! - `estimate`/`interval` return `None` when the strategy has no opinion
//!   yet ("do not cache" / "no interval"). The caller propagates that as
//!   TTL 0 and an omitted header; it is not an error.
//! - Returned durations are raw predictions: rounding to whole seconds and
//!   clamping to the advertised maximum happen at the façade.

mod adaptive;
mod quality_elastic;
mod static_ttl;
mod tbg1;
mod unchanged_span;
mod update_risk;

pub use adaptive::AdaptiveStrategy;
pub use quality_elastic::QualityElasticStrategy;
pub use static_ttl::StaticStrategy;
pub use tbg1::Tbg1Strategy;
pub use unchanged_span::{NyqvistishStrategy, SimplisticStrategy};
pub use update_risk::UpdateRiskStrategy;

use std::time::{Duration, Instant};

use crate::config::StrategySpec;
use crate::estimator::history::{History, Observation};
use crate::estimator::DEFAULT_INTERVAL;

/// Read-only view a strategy receives when predicting.
pub struct StrategyContext<'a> {
    /// The moment the prediction is being made.
    pub now: Instant,
    /// The verifier-owned histories for this fingerprint.
    pub history: &'a History,
    /// 95th-percentile upstream response time over the recent window.
    pub p95_response_time: Option<Duration>,
}

/// Pluggable policy turning a fingerprint's history into a TTL estimate
/// and a sampling interval.
pub trait EstimationStrategy: Send {
    /// One-time setup; logs the active strategy and its parameters.
    fn initialize(&mut self) {}

    /// Feed one new observation. Called in append order.
    fn observe(&mut self, _observation: &Observation) {}

    /// Predict how long the current response stays valid.
    fn estimate(&mut self, cx: &StrategyContext<'_>) -> Option<Duration>;

    /// Predict how long to wait before the next sample.
    fn interval(&mut self, cx: &StrategyContext<'_>) -> Option<Duration>;
}

/// Construct an initialized strategy for the given spec.
///
/// Returns `None` for passthrough — no verifier should be created at all.
pub(crate) fn build(spec: &StrategySpec) -> Option<Box<dyn EstimationStrategy>> {
    let mut strategy: Box<dyn EstimationStrategy> = match *spec {
        StrategySpec::Passthrough => return None,
        StrategySpec::Static(ttl) => Box::new(StaticStrategy::new(ttl)),
        StrategySpec::Adaptive(alpha) => Box::new(AdaptiveStrategy::new(alpha)),
        StrategySpec::UpdateRisk(rho) => Box::new(UpdateRiskStrategy::new(rho)),
        StrategySpec::QualityElastic(slo) => Box::new(QualityElasticStrategy::new(slo)),
        StrategySpec::Tbg1 => Box::new(Tbg1Strategy::new()),
        StrategySpec::Simplistic => Box::new(SimplisticStrategy),
        StrategySpec::Nyqvistish => Box::new(NyqvistishStrategy),
    };
    strategy.initialize();
    Some(strategy)
}

/// Shared interval policy: half the last estimate, floored at the default
/// interval. Used by the adaptive and update-risk families.
pub(crate) fn bounded_interval(last_estimate: Option<Duration>) -> Duration {
    let half = last_estimate.unwrap_or(Duration::ZERO) / 2;
    half.max(DEFAULT_INTERVAL)
}
