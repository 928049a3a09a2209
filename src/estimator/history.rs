//! Per-verifier histories and derived statistics.
//!
//! A verifier records three append-only sequences — observations, estimates,
//! and sampling intervals — plus a fixed-capacity ring of recent response
//! times. Strategies read these through [`History`]; nothing outside the
//! owning verifier mutates them.

use std::time::{Duration, Instant};

/// One observed response for a fingerprint.
///
/// The reply itself is not retained — only a digest of its canonical form,
/// which is all change detection needs.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// When the response was observed.
    pub timestamp: Instant,
    /// Digest of the canonical reply form.
    pub digest: u64,
    /// Measured upstream round-trip time.
    pub response_time: Duration,
}

/// A strategy-produced validity estimate.
#[derive(Debug, Clone, Copy)]
pub struct EstimateRecord {
    /// How long the response is predicted to stay unchanged.
    pub validity: Duration,
    /// When the estimate was produced.
    pub timestamp: Instant,
}

/// A strategy-produced sampling interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalRecord {
    /// How long the verifier worker should wait before its next wakeup.
    pub duration: Duration,
    /// When the interval was produced.
    pub timestamp: Instant,
}

/// Append-only histories for one fingerprint, in observation order.
#[derive(Debug, Default)]
pub struct History {
    observations: Vec<Observation>,
    estimates: Vec<EstimateRecord>,
    intervals: Vec<IntervalRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// All observations, oldest first.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn last_estimate(&self) -> Option<&EstimateRecord> {
        self.estimates.last()
    }

    pub fn last_interval(&self) -> Option<&IntervalRecord> {
        self.intervals.last()
    }

    pub(crate) fn push_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub(crate) fn push_estimate(&mut self, estimate: EstimateRecord) {
        self.estimates.push(estimate);
    }

    pub(crate) fn push_interval(&mut self, interval: IntervalRecord) {
        self.intervals.push(interval);
    }

    /// Span covered by the longest suffix of observations whose replies all
    /// equal the most recent one. Zero when the history is empty or the
    /// newest reply just changed.
    pub fn unchanged_span(&self) -> Duration {
        let Some(newest) = self.observations.last() else {
            return Duration::ZERO;
        };

        let mut oldest_matching = newest;
        for observation in self.observations.iter().rev() {
            if observation.digest != newest.digest {
                break;
            }
            oldest_matching = observation;
        }

        newest
            .timestamp
            .saturating_duration_since(oldest_matching.timestamp)
    }
}

/// Backwards K-update distance, as in Lee et al., "An Update-Risk Based
/// Approach to TTL Estimation in Web Caching" (2002).
///
/// Walks the observations newest to oldest. Each time the reply digest
/// differs from the most recent digest seen during the walk, the older
/// observation's timestamp is recorded. Stops after `k` records or when the
/// history is exhausted. The returned timestamps are strictly decreasing
/// (newest change first) and the vector length is the count actually found.
pub fn backwards_update_distance(observations: &[Observation], k: usize) -> Vec<Instant> {
    let mut timestamps = Vec::with_capacity(k);

    // The current value is, as it must be, the most recent and "true" one.
    let Some(mut reference) = observations.last() else {
        return timestamps;
    };

    for observation in observations.iter().rev() {
        if timestamps.len() >= k {
            break;
        }
        if observation.digest != reference.digest {
            timestamps.push(observation.timestamp);
            reference = observation;
        }
    }

    timestamps
}

/// Fixed-capacity ring of recent response times.
///
/// Bounds memory regardless of verifier lifetime; percentiles are computed
/// over whatever the window currently holds.
#[derive(Debug)]
pub struct ResponseTimeRing {
    samples: Vec<Duration>,
    capacity: usize,
    next: usize,
}

impl ResponseTimeRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "response time window must hold at least one sample");
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile over the current window. `None` when empty.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        Some(sorted[rank - 1])
    }
}
