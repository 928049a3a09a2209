//! Munin - cache-validity estimation for unary gRPC services
//!
//! Munin makes a stateless unary service cacheable when the service itself
//! carries no freshness information. A server-side interceptor observes the
//! responses flowing through it and, per `(method, request)` fingerprint,
//! maintains a validity estimator that predicts for how many seconds a
//! response will remain unchanged, advertised as a standard
//! `cache-control: must-revalidate, max-age=N` header. A client-side
//! interceptor caches replies for exactly as long as the header allows.
//!
//! # Server Example
//!
//! ```rust,no_run
//! use munin::{observe_unary, ValidityEstimator};
//! use tonic::{Response, Status};
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct GetRequest {
//!     #[prost(string, tag = "1")]
//!     key: String,
//! }
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct GetReply {
//!     #[prost(string, tag = "1")]
//!     value: String,
//! }
//!
//! async fn handle(
//!     estimator: &ValidityEstimator,
//!     request: GetRequest,
//! ) -> Result<Response<GetReply>, Status> {
//!     observe_unary(estimator, "/kv.Store/Get", &request, || async {
//!         // ... the real handler ...
//!         Ok(Response::new(GetReply { value: "v".into() }))
//!     })
//!     .await
//! }
//! ```
//!
//! # Proxy Client Example
//!
//! ```rust,ignore
//! let cache = ResponseCache::new(&CacheConfig::default());
//! let response = through_cache(
//!     &cache,
//!     &estimator,
//!     "http://origin:50051",
//!     "/kv.Store/Get",
//!     &request,
//!     || client.get(request.clone()),
//! )
//! .await?;
//! ```
//!
//! Strategy selection is driven by `PROXY_MAX_AGE` (e.g. `static-10`,
//! `dynamic-adaptive-0.5`); `PROXY_CACHE_BLACKLIST` exempts matching
//! methods. Unset or unparseable configuration means passthrough: no
//! headers, no verifiers, no overhead beyond a fingerprint lookup.

pub mod cache;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fingerprint;
pub mod interceptor;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{through_cache, CacheConfig, ResponseCache, X_CACHE_HEADER};
pub use config::{EstimatorConfig, Settings, StrategySpec};
pub use error::{MuninError, Result};
pub use estimator::{
    ValidityEstimator, DEFAULT_INTERVAL, MAXIMUM_CACHE_VALIDITY, MAX_VERIFIER_LIFETIME,
};
pub use fingerprint::{fingerprint, CacheableMessage, Fingerprint};
pub use interceptor::{format_cache_control, observe_unary, CACHE_CONTROL_HEADER};
