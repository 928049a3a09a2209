//! End-to-end scenarios for the server-side interceptor:
//! static TTLs, blacklisting, passthrough, and failure propagation.

use std::time::Duration;

use tonic::{Code, Response, Status};

use munin::{
    observe_unary, EstimatorConfig, StrategySpec, ValidityEstimator, CACHE_CONTROL_HEADER,
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

fn cache_control(response: &Response<EchoReply>) -> Option<String> {
    response
        .metadata()
        .get(CACHE_CONTROL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn observed(
    estimator: &ValidityEstimator,
    method: &str,
    req: &EchoRequest,
    value: &str,
) -> Response<EchoReply> {
    observe_unary(estimator, method, req, || async {
        Ok(Response::new(reply(value)))
    })
    .await
    .unwrap()
}

// =========================================================================
// S1: static strategy
// =========================================================================

#[tokio::test]
async fn static_strategy_sets_configured_max_age() {
    let estimator = ValidityEstimator::new(
        EstimatorConfig::new().strategy(StrategySpec::Static(Duration::from_secs(10))),
    )
    .unwrap();

    for i in 0..5 {
        let req = request(&format!("key-{i}"));
        estimator.ensure_verifier(
            "/kv.Store/Get",
            &req,
            &reply("v"),
            "localhost:9741",
            Duration::from_millis(3),
        );

        for _ in 0..2 {
            let response = observed(&estimator, "/kv.Store/Get", &req, "v").await;
            assert_eq!(
                cache_control(&response).as_deref(),
                Some("must-revalidate, max-age=10")
            );
        }
    }
    assert_eq!(estimator.active_verifiers(), 5);
}

// =========================================================================
// S5: blacklist
// =========================================================================

#[tokio::test]
async fn blacklisted_methods_never_get_a_header() {
    let config = EstimatorConfig::new()
        .strategy(StrategySpec::Static(Duration::from_secs(10)))
        .blacklist("^/Secret/");
    let estimator = ValidityEstimator::new(config).unwrap();

    let req = request("classified");
    estimator.ensure_verifier(
        "/Secret/Read",
        &req,
        &reply("v"),
        "localhost:9741",
        Duration::from_millis(3),
    );
    let response = observed(&estimator, "/Secret/Read", &req, "v").await;
    assert_eq!(cache_control(&response), None);
    // Blacklisted methods never even get a verifier.
    assert_eq!(estimator.active_verifiers(), 0);

    estimator.ensure_verifier(
        "/Public/Read",
        &req,
        &reply("v"),
        "localhost:9741",
        Duration::from_millis(3),
    );
    let response = observed(&estimator, "/Public/Read", &req, "v").await;
    assert_eq!(
        cache_control(&response).as_deref(),
        Some("must-revalidate, max-age=10")
    );
}

// =========================================================================
// S6: passthrough
// =========================================================================

#[tokio::test]
async fn passthrough_emits_nothing_and_creates_nothing() {
    let estimator = ValidityEstimator::new(EstimatorConfig::new()).unwrap();

    let req = request("key");
    estimator.ensure_verifier(
        "/kv.Store/Get",
        &req,
        &reply("v"),
        "localhost:9741",
        Duration::from_millis(3),
    );
    let response = observed(&estimator, "/kv.Store/Get", &req, "v").await;

    assert_eq!(cache_control(&response), None);
    assert_eq!(estimator.active_verifiers(), 0);
}

// =========================================================================
// Failure propagation
// =========================================================================

#[tokio::test]
async fn handler_failure_is_returned_unchanged() {
    let estimator = ValidityEstimator::new(
        EstimatorConfig::new().strategy(StrategySpec::Static(Duration::from_secs(10))),
    )
    .unwrap();

    let req = request("key");
    let result: Result<Response<EchoReply>, Status> =
        observe_unary(&estimator, "/kv.Store/Get", &req, || async {
            Err(Status::unavailable("origin down"))
        })
        .await;

    let status = result.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(status.message(), "origin down");
}

// =========================================================================
// No verifier yet: no header, success still flows
// =========================================================================

#[tokio::test]
async fn unseen_fingerprint_gets_no_header() {
    let estimator = ValidityEstimator::new(
        EstimatorConfig::new().strategy(StrategySpec::Static(Duration::from_secs(10))),
    )
    .unwrap();

    let req = request("never-ensured");
    let response = observed(&estimator, "/kv.Store/Get", &req, "v").await;
    assert_eq!(cache_control(&response), None);
}
