//! Tests for the client-side [`ResponseCache`] and the `through_cache`
//! proxy interceptor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tonic::metadata::MetadataValue;
use tonic::{Code, Response, Status};

use munin::{
    fingerprint, through_cache, CacheConfig, EstimatorConfig, ResponseCache, StrategySpec,
    ValidityEstimator, CACHE_CONTROL_HEADER, X_CACHE_HEADER,
};

#[derive(Clone, PartialEq, prost::Message)]
struct EchoRequest {
    #[prost(string, tag = "1")]
    key: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct EchoReply {
    #[prost(string, tag = "1")]
    value: String,
}

fn request(key: &str) -> EchoRequest {
    EchoRequest { key: key.into() }
}

fn reply(value: &str) -> EchoReply {
    EchoReply {
        value: value.into(),
    }
}

const METHOD: &str = "/kv.Store/Get";
const TARGET: &str = "localhost:9741";

fn x_cache(response: &Response<EchoReply>) -> Option<&str> {
    response
        .metadata()
        .get(X_CACHE_HEADER)
        .and_then(|v| v.to_str().ok())
}

// =========================================================================
// ResponseCache
// =========================================================================

#[test]
fn cache_config_defaults_and_builder() {
    assert_eq!(CacheConfig::default().max_entries, 10_000);
    assert_eq!(CacheConfig::new().max_entries(500).max_entries, 500);
}

#[test]
fn miss_then_hit_roundtrip() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let fp = fingerprint(METHOD, &request("k"));

    assert!(cache.get::<EchoReply>(METHOD, fp).is_none());

    cache.insert(fp, &reply("v"), 60);
    let cached = cache.get::<EchoReply>(METHOD, fp);
    assert_eq!(cached, Some(reply("v")));
}

#[test]
fn different_fingerprint_is_a_miss() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.insert(fingerprint(METHOD, &request("a")), &reply("v"), 60);
    assert!(cache
        .get::<EchoReply>(METHOD, fingerprint(METHOD, &request("b")))
        .is_none());
}

#[test]
fn entry_expires_after_its_own_max_age() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let fp = fingerprint(METHOD, &request("k"));

    cache.insert(fp, &reply("v"), 1);
    assert!(cache.get::<EchoReply>(METHOD, fp).is_some());

    std::thread::sleep(Duration::from_millis(1200));
    assert!(cache.get::<EchoReply>(METHOD, fp).is_none());
    assert_eq!(cache.entry_count(), 0);
}

// =========================================================================
// through_cache
// =========================================================================

fn advertised_response(value: &str, max_age: u64) -> Response<EchoReply> {
    let mut response = Response::new(reply(value));
    let header = format!("must-revalidate, max-age={max_age}");
    response.metadata_mut().insert(
        CACHE_CONTROL_HEADER,
        MetadataValue::try_from(header.as_str()).unwrap(),
    );
    response
}

#[tokio::test]
async fn upstream_invoked_once_then_served_from_cache() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let estimator = ValidityEstimator::new(
        EstimatorConfig::new().strategy(StrategySpec::Static(Duration::from_secs(10))),
    )
    .unwrap();
    let invocations = AtomicUsize::new(0);

    let req = request("k");
    for round in 0..3 {
        let response = through_cache(&cache, &estimator, TARGET, METHOD, &req, || async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(advertised_response("v", 60))
        })
        .await
        .unwrap();

        assert_eq!(response.get_ref(), &reply("v"));
        let expected = if round == 0 { "miss" } else { "hit" };
        assert_eq!(x_cache(&response), Some(expected));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn miss_registers_the_fingerprint_for_verification() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let estimator = ValidityEstimator::new(
        EstimatorConfig::new().strategy(StrategySpec::Static(Duration::from_secs(10))),
    )
    .unwrap();

    let req = request("k");
    through_cache(&cache, &estimator, TARGET, METHOD, &req, || async {
        Ok(advertised_response("v", 60))
    })
    .await
    .unwrap();

    assert_eq!(estimator.active_verifiers(), 1);
}

#[tokio::test]
async fn unadvertised_response_is_not_stored() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let estimator = ValidityEstimator::new(EstimatorConfig::new()).unwrap();
    let invocations = AtomicUsize::new(0);

    let req = request("k");
    for _ in 0..2 {
        let response = through_cache(&cache, &estimator, TARGET, METHOD, &req, || async {
            invocations.fetch_add(1, Ordering::SeqCst);
            // No cache-control header at all.
            Ok(Response::new(reply("v")))
        })
        .await
        .unwrap();
        assert_eq!(x_cache(&response), Some("miss"));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn zero_max_age_is_not_stored() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let estimator = ValidityEstimator::new(EstimatorConfig::new()).unwrap();

    let req = request("k");
    through_cache(&cache, &estimator, TARGET, METHOD, &req, || async {
        Ok(advertised_response("v", 0))
    })
    .await
    .unwrap();

    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn upstream_error_is_propagated_and_not_cached() {
    let cache = ResponseCache::new(&CacheConfig::default());
    let estimator = ValidityEstimator::new(EstimatorConfig::new()).unwrap();

    let req = request("k");
    let result: Result<Response<EchoReply>, Status> =
        through_cache(&cache, &estimator, TARGET, METHOD, &req, || async {
            Err(Status::deadline_exceeded("origin too slow"))
        })
        .await;

    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
    assert_eq!(cache.entry_count(), 0);
}
