//! Server-side validity estimation.
//!
//! The [`ValidityEstimator`] is the entry point the interceptor layer talks
//! to. It fingerprints `(method, request)` pairs, lazily creates one
//! [`verifier`](self::verifier) per active fingerprint, feeds verifiers the
//! responses flowing through the server, and turns their estimates into the
//! whole-second `max-age` the interceptor advertises.
//!
//! ```text
//! response observed ──► fingerprint ──► registry ──► verifier ──► strategy
//!                                                        │
//!                                    cache-control ◄─────┘ (rounded, clamped)
//! ```
//!
//! Estimation failures never propagate to RPC handlers: at worst the
//! cache-control header is omitted.

pub mod history;
pub(crate) mod registry;
pub mod strategy;
pub(crate) mod verifier;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::EstimatorConfig;
use crate::fingerprint::{digest, fingerprint, label, CacheableMessage};
use crate::telemetry::{self, CsvSink, EstimateSource};
use crate::Result;

use registry::VerifierRegistry;
use verifier::Verifier;

/// Floor for strategy sampling intervals.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Clamp on the advertised `max-age`, independent of verifier lifetime.
pub const MAXIMUM_CACHE_VALIDITY: Duration = Duration::from_secs(300);

/// Default wall-clock lifetime of a verifier.
pub const MAX_VERIFIER_LIFETIME: Duration = Duration::from_secs(1800);

/// Response-time ring capacity per verifier.
pub(crate) const RESPONSE_TIME_WINDOW: usize = 256;

/// Completion channel slots; a full channel means the eviction consumer
/// has stalled.
pub(crate) const COMPLETION_CHANNEL_CAPACITY: usize = 1024;

/// Worker poll period before its strategy has an interval opinion.
pub(crate) const BOOTSTRAP_POLL: Duration = Duration::from_millis(500);

/// Estimates for how long responses may be cached, per fingerprint.
///
/// Construct once per process, inside a tokio runtime (the registry's
/// eviction consumer and each verifier's worker are tokio tasks), and share
/// it between the server and client interceptors.
pub struct ValidityEstimator {
    config: EstimatorConfig,
    registry: VerifierRegistry,
    telemetry: Option<Arc<CsvSink>>,
}

impl ValidityEstimator {
    /// Create an estimator from resolved configuration.
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        let telemetry = match &config.telemetry_path {
            Some(path) => Some(Arc::new(CsvSink::open(path)?)),
            None => None,
        };

        if config.strategy.is_passthrough() {
            info!("estimator in passthrough mode, no cache-control headers will be emitted");
        }

        Ok(Self {
            registry: VerifierRegistry::new(config.verifier_lifetime),
            config,
            telemetry,
        })
    }

    /// Create an estimator from `PROXY_MAX_AGE` / `PROXY_CACHE_BLACKLIST`.
    pub fn from_env() -> Result<Self> {
        Self::new(EstimatorConfig::from_env())
    }

    /// The resolved configuration this estimator runs with.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Number of verifiers currently registered.
    pub fn active_verifiers(&self) -> u64 {
        self.registry.entry_count()
    }

    /// Feed one observed response and return the TTL to advertise, in whole
    /// seconds. Zero means "omit the header": passthrough mode, blacklisted
    /// method, no verifier yet, expired verifier, or no estimate yet.
    pub fn on_response_observed<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        response: &Resp,
        response_time: Duration,
    ) -> u64
    where
        Req: CacheableMessage,
        Resp: CacheableMessage,
    {
        if self.config.strategy.is_passthrough() || self.blacklisted(method) {
            return 0;
        }

        metrics::counter!(telemetry::OBSERVATIONS_TOTAL, "method" => method.to_owned())
            .increment(1);

        let fingerprint = fingerprint(method, request);
        let Some(verifier) = self.registry.lookup(fingerprint) else {
            // No estimation at this time is not an error, but no caching
            // should occur either.
            return 0;
        };

        if let Err(error) = verifier.update(digest(&response.canonical()), response_time) {
            warn!(verifier = verifier.label(), %error, "unable to update verifier");
            return 0;
        }

        let Some(validity) = verifier.estimate() else {
            return 0;
        };
        let ttl = self.max_age_seconds(validity);

        if let Some(sink) = &self.telemetry {
            sink.record(EstimateSource::Client, verifier.label(), ttl);
        }
        metrics::counter!(telemetry::ESTIMATES_TOTAL, "source" => "client").increment(1);

        ttl
    }

    /// Make sure a verifier exists for this fingerprint, seeding it with
    /// `seed_response`. An existing entry — even one that has finished and
    /// awaits its completion sweep — is left untouched.
    pub fn ensure_verifier<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        seed_response: &Resp,
        target: &str,
        response_time: Duration,
    ) where
        Req: CacheableMessage,
        Resp: CacheableMessage,
    {
        if self.config.strategy.is_passthrough() || self.blacklisted(method) {
            return;
        }

        let fingerprint = fingerprint(method, request);
        if self.registry.lookup(fingerprint).is_some() {
            return;
        }

        let Some(strategy) = strategy::build(&self.config.strategy) else {
            return;
        };

        let label = label(method, request);
        let deadline = Instant::now() + self.config.verifier_lifetime;
        let seed_digest = digest(&seed_response.canonical());
        let done = self.registry.completion_sender();
        let telemetry = self.telemetry.clone();
        let target = target.to_string();

        let (verifier, created) = self.registry.insert_if_absent(fingerprint, move || {
            Verifier::spawn(
                fingerprint,
                target,
                label,
                seed_digest,
                response_time,
                deadline,
                strategy,
                telemetry,
                done,
            )
        });

        if created {
            info!(verifier = verifier.label(), "stored for verification");
            metrics::counter!(telemetry::VERIFIERS_CREATED_TOTAL).increment(1);
        }
    }

    fn blacklisted(&self, method: &str) -> bool {
        self.config
            .blacklist
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(method))
    }

    /// Round a validity to whole seconds and clamp to the advertised bound.
    fn max_age_seconds(&self, validity: Duration) -> u64 {
        let rounded = validity.as_secs_f64().round() as u64;
        rounded.min(self.config.max_validity.as_secs())
    }
}
