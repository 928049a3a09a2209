//! Server-side unary interception.
//!
//! [`observe_unary`] wraps a unary handler: it times the call, feeds the
//! successful response to the [`ValidityEstimator`], and attaches a
//! `cache-control: must-revalidate, max-age=N` header when the estimator
//! has a positive TTL. Handler failures are returned unchanged; estimator
//! failures only ever cost the header.
//!
//! The handler is passed as a closure returning a future so the helper can
//! wrap any generated tonic service method without knowing its types.

use std::future::Future;
use std::time::Instant;

use tonic::metadata::MetadataValue;
use tonic::{Response, Status};
use tracing::{debug, warn};

use crate::estimator::ValidityEstimator;
use crate::fingerprint::CacheableMessage;

/// Response header carrying the advertised validity.
pub const CACHE_CONTROL_HEADER: &str = "cache-control";

/// Render the `cache-control` value for a TTL in whole seconds.
pub fn format_cache_control(max_age_secs: u64) -> String {
    format!("must-revalidate, max-age={max_age_secs}")
}

/// Run a unary handler and annotate its response with a cache-control
/// header when the estimator has an opinion.
pub async fn observe_unary<Req, Resp, F, Fut>(
    estimator: &ValidityEstimator,
    method: &str,
    request: &Req,
    handler: F,
) -> Result<Response<Resp>, Status>
where
    Req: CacheableMessage,
    Resp: CacheableMessage,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response<Resp>, Status>>,
{
    let started = Instant::now();
    let mut response = match handler().await {
        Ok(response) => response,
        Err(status) => {
            debug!(method, error = %status, "upstream call failed");
            return Err(status);
        }
    };
    let elapsed = started.elapsed();

    let max_age = estimator.on_response_observed(method, request, response.get_ref(), elapsed);
    if max_age > 0 {
        let header = format_cache_control(max_age);
        match MetadataValue::try_from(header.as_str()) {
            Ok(value) => {
                response.metadata_mut().insert(CACHE_CONTROL_HEADER, value);
                debug!(method, max_age, "hit upstream, cache max-age set");
            }
            Err(error) => warn!(method, %error, "failed to encode cache-control header"),
        }
    } else {
        debug!(method, "hit upstream, no cache max-age");
    }

    Ok(response)
}
