//! Client-side response caching.
//!
//! The reverse-proxy's client half stores upstream replies for exactly as
//! long as the server-side estimator advertised via `cache-control`. The
//! cache holds encoded reply bytes keyed by fingerprint; each entry expires
//! independently after its own `max-age`.
//!
//! [`through_cache`] is the client interceptor: cache hit → decoded reply
//! with `x-cache: hit`; miss → invoke upstream, honour the advertised
//! `max-age`, register the fingerprint for verification, and tag the
//! response `x-cache: miss`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use tonic::metadata::MetadataValue;
use tonic::{Response, Status};
use tracing::{debug, warn};

use crate::estimator::ValidityEstimator;
use crate::fingerprint::{fingerprint, CacheableMessage, Fingerprint};
use crate::interceptor::CACHE_CONTROL_HEADER;
use crate::telemetry;

/// Response header reporting cache disposition: "hit" or "miss".
pub const X_CACHE_HEADER: &str = "x-cache";

/// Configuration for the client response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached replies. Default: 10,000.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached replies.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// A cached reply: encoded bytes plus its advertised lifetime.
#[derive(Clone)]
struct CachedReply {
    bytes: Arc<[u8]>,
    ttl: Duration,
}

/// Expires each entry after its own advertised `max-age`.
struct MaxAgeExpiry;

impl Expiry<Fingerprint, CachedReply> for MaxAgeExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CachedReply,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory reply cache honouring per-entry `max-age`.
pub struct ResponseCache {
    cache: Cache<Fingerprint, CachedReply>,
}

impl ResponseCache {
    /// Create a response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(MaxAgeExpiry)
            .build();
        Self { cache }
    }

    /// Look up and decode a cached reply.
    ///
    /// Returns `None` on miss or expiry. An entry that no longer decodes
    /// (message definition changed mid-process) is dropped and counts as a
    /// miss. Emits cache hit/miss metrics.
    pub fn get<Resp>(&self, method: &str, fingerprint: Fingerprint) -> Option<Resp>
    where
        Resp: prost::Message + Default,
    {
        let Some(reply) = self.cache.get(&fingerprint) else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "method" => method.to_owned())
                .increment(1);
            return None;
        };

        match Resp::decode(reply.bytes.as_ref()) {
            Ok(decoded) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "method" => method.to_owned())
                    .increment(1);
                Some(decoded)
            }
            Err(error) => {
                warn!(method, %fingerprint, %error, "dropping undecodable cached reply");
                self.cache.invalidate(&fingerprint);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "method" => method.to_owned())
                    .increment(1);
                None
            }
        }
    }

    /// Store a reply for `max_age_secs` seconds.
    pub fn insert<Resp: prost::Message>(
        &self,
        fingerprint: Fingerprint,
        reply: &Resp,
        max_age_secs: u64,
    ) {
        let reply = CachedReply {
            bytes: reply.encode_to_vec().into(),
            ttl: Duration::from_secs(max_age_secs),
        };
        self.cache.insert(fingerprint, reply);
    }

    /// Current number of cached replies, after flushing pending
    /// housekeeping so the count reflects completed expirations.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

/// Extract the `max-age` seconds from `cache-control` header values.
///
/// Scans comma-separated directives in each value; the first parseable
/// `max-age` wins. `None` when no directive is present or parseable.
pub fn max_age<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<u64> {
    for header in values {
        for directive in header.split(',') {
            if let Some(age) = directive.trim().strip_prefix("max-age=") {
                return age.parse().ok();
            }
        }
    }
    None
}

/// Client interceptor: serve from cache or invoke upstream and remember
/// the reply for as long as the response headers allow.
pub async fn through_cache<Req, Resp, F, Fut>(
    cache: &ResponseCache,
    estimator: &ValidityEstimator,
    target: &str,
    method: &str,
    request: &Req,
    invoke: F,
) -> Result<Response<Resp>, Status>
where
    Req: CacheableMessage,
    Resp: prost::Message + Default,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response<Resp>, Status>>,
{
    let fingerprint = fingerprint(method, request);

    if let Some(reply) = cache.get::<Resp>(method, fingerprint) {
        debug!(method, %fingerprint, "using cached response");
        let mut response = Response::new(reply);
        response
            .metadata_mut()
            .insert(X_CACHE_HEADER, MetadataValue::from_static("hit"));
        return Ok(response);
    }

    let started = Instant::now();
    let mut response = match invoke().await {
        Ok(response) => response,
        Err(status) => {
            debug!(method, error = %status, "error calling upstream");
            return Err(status);
        }
    };
    let elapsed = started.elapsed();

    let advertised = max_age(
        response
            .metadata()
            .get_all(CACHE_CONTROL_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );
    match advertised {
        Some(secs) if secs > 0 => {
            cache.insert(fingerprint, response.get_ref(), secs);
            debug!(method, max_age = secs, "fetched upstream response, stored");
        }
        _ => debug!(method, "fetched upstream response, not stored"),
    }

    estimator.ensure_verifier(method, request, response.get_ref(), target, elapsed);

    response
        .metadata_mut()
        .insert(X_CACHE_HEADER, MetadataValue::from_static("miss"));
    Ok(response)
}
