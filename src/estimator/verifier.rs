//! Per-fingerprint verifier.
//!
//! A verifier owns the histories for one `(method, request)` fingerprint,
//! drives its strategy, and runs a worker task that wakes on the current
//! sampling interval until the verifier's lifetime ends. On expiry the
//! worker posts the fingerprint to the registry's completion channel so the
//! entry can be reaped.
//!
//! Concurrency: `update` and `estimate` are called from interceptor
//! handlers while the worker reads the latest interval; one mutex around
//! the verifier state covers all three.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::estimator::history::{
    EstimateRecord, History, IntervalRecord, Observation, ResponseTimeRing,
};
use crate::estimator::strategy::{EstimationStrategy, StrategyContext};
use crate::estimator::{BOOTSTRAP_POLL, RESPONSE_TIME_WINDOW};
use crate::fingerprint::Fingerprint;
use crate::telemetry::{self, CsvSink, EstimateSource};
use crate::{MuninError, Result};

struct VerifierState {
    strategy: Box<dyn EstimationStrategy>,
    history: History,
    response_times: ResponseTimeRing,
}

pub(crate) struct Verifier {
    fingerprint: Fingerprint,
    target: String,
    label: String,
    deadline: Instant,
    state: Mutex<VerifierState>,
    done: mpsc::Sender<Fingerprint>,
    telemetry: Option<Arc<CsvSink>>,
}

impl Verifier {
    /// Create a verifier, seed its history with the response that triggered
    /// creation, and start its worker task.
    ///
    /// Must be called within a tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        fingerprint: Fingerprint,
        target: String,
        label: String,
        seed_digest: u64,
        seed_response_time: Duration,
        deadline: Instant,
        strategy: Box<dyn EstimationStrategy>,
        telemetry: Option<Arc<CsvSink>>,
        done: mpsc::Sender<Fingerprint>,
    ) -> Arc<Self> {
        let verifier = Arc::new(Self {
            fingerprint,
            target,
            label,
            deadline,
            state: Mutex::new(VerifierState {
                strategy,
                history: History::new(),
                response_times: ResponseTimeRing::new(RESPONSE_TIME_WINDOW),
            }),
            done,
            telemetry,
        });

        if let Err(error) = verifier.update(seed_digest, seed_response_time) {
            warn!(verifier = %verifier.label, %error, "failed to seed verifier history");
        }

        tokio::spawn(Arc::clone(&verifier).run());

        verifier
    }

    /// Stable human-readable label, `method(request-digest)`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the verifier's lifetime has ended.
    pub fn finished(&self) -> bool {
        Instant::now() > self.deadline
    }

    /// Record a new observation and refresh the estimate and interval.
    ///
    /// Fails once the verifier has expired; histories stay frozen from then
    /// on and the registry reaps the entry via the completion channel.
    pub fn update(&self, digest: u64, response_time: Duration) -> Result<()> {
        if self.finished() {
            return Err(MuninError::VerifierFinished(self.label.clone()));
        }

        let now = Instant::now();
        let mut state = self.state.lock().expect("verifier state lock poisoned");
        let VerifierState {
            strategy,
            history,
            response_times,
        } = &mut *state;

        let observation = Observation {
            timestamp: now,
            digest,
            response_time,
        };
        response_times.push(response_time);
        history.push_observation(observation);
        strategy.observe(&observation);

        let p95 = response_times.percentile(0.95);
        let estimate = strategy.estimate(&StrategyContext {
            now,
            history,
            p95_response_time: p95,
        });
        match estimate {
            Some(validity) => history.push_estimate(EstimateRecord {
                validity,
                timestamp: now,
            }),
            None => debug!(verifier = %self.label, "no estimate yet, retaining previous"),
        }

        let interval = strategy.interval(&StrategyContext {
            now,
            history,
            p95_response_time: p95,
        });
        if let Some(duration) = interval {
            history.push_interval(IntervalRecord {
                duration,
                timestamp: now,
            });
        }

        Ok(())
    }

    /// The most recent validity estimate, if any has been produced.
    pub fn estimate(&self) -> Option<Duration> {
        self.state
            .lock()
            .expect("verifier state lock poisoned")
            .history
            .last_estimate()
            .map(|e| e.validity)
    }

    fn current_interval(&self) -> Option<Duration> {
        self.state
            .lock()
            .expect("verifier state lock poisoned")
            .history
            .last_interval()
            .map(|i| i.duration)
    }

    /// Worker loop: wait out the current sampling interval, stop at the
    /// deadline, and signal completion exactly once.
    async fn run(self: Arc<Self>) {
        debug!(verifier = %self.label, target = %self.target, "verifier worker started");

        loop {
            let Some(delay) = self.current_interval() else {
                // No interval opinion yet; poll until the strategy has one
                // or the lifetime runs out.
                if self.finished() {
                    break;
                }
                tokio::time::sleep(BOOTSTRAP_POLL).await;
                continue;
            };

            debug!(
                verifier = %self.label,
                delay_ms = delay.as_millis() as u64,
                "scheduled for verification"
            );
            tokio::time::sleep(delay).await;

            if self.finished() {
                info!(verifier = %self.label, "needs no further verification");
                break;
            }

            // Proactive upstream re-fetching would slot in here. Without it
            // the wakeup just snapshots the current estimate for the log.
            if let (Some(sink), Some(validity)) = (&self.telemetry, self.estimate()) {
                sink.record(
                    EstimateSource::Verifier,
                    &self.label,
                    validity.as_secs_f64().round() as u64,
                );
            }
        }

        metrics::counter!(telemetry::VERIFIERS_EXPIRED_TOTAL).increment(1);

        match self.done.try_send(self.fingerprint) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(fingerprint)) => {
                // A full channel means the eviction consumer has stalled;
                // keep attempting so the entry is eventually reaped.
                warn!(verifier = %self.label, "completion channel full, eviction consumer stalled");
                let _ = self.done.send(fingerprint).await;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(verifier = %self.label, "completion channel closed, registry gone");
            }
        }
    }
}
