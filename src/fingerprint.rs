//! Request fingerprinting.
//!
//! A [`Fingerprint`] identifies a `(method, request)` pair and keys every
//! per-request structure in the crate: the verifier registry on the server
//! side and the response cache on the client side. Equal inputs always
//! produce equal fingerprints; collisions merely degrade estimation quality
//! for the colliding entries, they never corrupt correctness.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A message that can participate in fingerprinting and change detection.
///
/// The canonical form must be deterministic for equal messages. All prost
/// messages qualify via their `Debug` rendering, which is stable for a
/// given message definition within a process lifetime — sufficient for
/// in-memory keys, the same trade-off the response cache key makes.
pub trait CacheableMessage {
    /// Deterministic string form of the message.
    fn canonical(&self) -> String;
}

impl<M: prost::Message> CacheableMessage for M {
    fn canonical(&self) -> String {
        format!("{self:?}")
    }
}

/// Stable identity of a `(method, request)` pair.
///
/// Displayed as a fixed-width hex string in logs and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the fingerprint of a `(method, request)` pair.
///
/// Uses `DefaultHasher` (SipHash) for a reasonable collision-resistance /
/// performance trade-off; the hash runs on every intercepted call.
pub fn fingerprint(method: &str, request: &impl CacheableMessage) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    method.hash(&mut hasher);
    request.canonical().hash(&mut hasher);
    Fingerprint(hasher.finish())
}

/// 64-bit digest of a canonical message form.
///
/// Strategies compare digests instead of retaining reply payloads.
pub(crate) fn digest(canonical: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}

/// Human-readable verifier label: `method(request-digest)`.
///
/// Used in log lines and CSV telemetry rows.
pub(crate) fn label(method: &str, request: &impl CacheableMessage) -> String {
    format!("{method}({:08x})", digest(&request.canonical()))
}
