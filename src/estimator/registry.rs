//! Verifier registry.
//!
//! A process-wide map from fingerprint to verifier. Two removal paths:
//!
//! - the completion channel, drained by a background task — the primary
//!   path, fed by each verifier's worker when its lifetime ends;
//! - moka's time-based eviction as a backstop, swept at twice the maximum
//!   verifier lifetime, for entries whose worker never signalled.
//!
//! Insertion goes through moka's entry API so lookup + insert is atomic:
//! an existing entry is never replaced.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::sync::mpsc;
use tracing::info;

use crate::estimator::verifier::Verifier;
use crate::estimator::COMPLETION_CHANNEL_CAPACITY;
use crate::fingerprint::Fingerprint;

pub(crate) struct VerifierRegistry {
    verifiers: Cache<Fingerprint, Arc<Verifier>>,
    done_tx: mpsc::Sender<Fingerprint>,
}

impl VerifierRegistry {
    /// Create a registry and start its eviction consumer.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(verifier_lifetime: Duration) -> Self {
        let verifiers: Cache<Fingerprint, Arc<Verifier>> = Cache::builder()
            .time_to_live(verifier_lifetime * 2)
            .build();

        let (done_tx, mut done_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);

        let sweep_target = verifiers.clone();
        tokio::spawn(async move {
            while let Some(fingerprint) = done_rx.recv().await {
                info!(
                    %fingerprint,
                    remaining = sweep_target.entry_count(),
                    "verifier finished, removing from registry"
                );
                sweep_target.invalidate(&fingerprint);
            }
        });

        Self { verifiers, done_tx }
    }

    pub fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<Verifier>> {
        self.verifiers.get(&fingerprint)
    }

    /// Insert the factory's verifier only if the fingerprint is absent.
    ///
    /// Returns the entry's verifier and whether this call created it. An
    /// existing entry — even a finished one awaiting its completion sweep —
    /// is never replaced.
    pub fn insert_if_absent(
        &self,
        fingerprint: Fingerprint,
        factory: impl FnOnce() -> Arc<Verifier>,
    ) -> (Arc<Verifier>, bool) {
        let entry = self.verifiers.entry(fingerprint).or_insert_with(factory);
        let created = entry.is_fresh();
        (entry.into_value(), created)
    }

    /// Remove a fingerprint's verifier. Idempotent.
    pub fn remove(&self, fingerprint: Fingerprint) {
        self.verifiers.invalidate(&fingerprint);
    }

    /// Sender that verifiers use to signal completion.
    pub fn completion_sender(&self) -> mpsc::Sender<Fingerprint> {
        self.done_tx.clone()
    }

    /// Current number of registered verifiers, after flushing pending
    /// housekeeping so the count reflects completed evictions.
    pub fn entry_count(&self) -> u64 {
        self.verifiers.run_pending_tasks();
        self.verifiers.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::strategy::StaticStrategy;
    use crate::estimator::MAX_VERIFIER_LIFETIME;
    use crate::fingerprint::{fingerprint, CacheableMessage};
    use std::time::Instant;

    struct Plain(&'static str);

    impl CacheableMessage for Plain {
        fn canonical(&self) -> String {
            self.0.to_string()
        }
    }

    fn test_verifier(
        fp: Fingerprint,
        done: mpsc::Sender<Fingerprint>,
        deadline: Instant,
    ) -> Arc<Verifier> {
        Verifier::spawn(
            fp,
            "localhost:9741".to_string(),
            "/kv.Store/Get(00000001)".to_string(),
            1,
            Duration::from_millis(5),
            deadline,
            Box::new(StaticStrategy::new(Duration::from_secs(10))),
            None,
            done,
        )
    }

    #[tokio::test]
    async fn insert_if_absent_never_replaces() {
        let registry = VerifierRegistry::new(MAX_VERIFIER_LIFETIME);
        let fp = fingerprint("/kv.Store/Get", &Plain("key=1"));
        let deadline = Instant::now() + Duration::from_secs(60);

        let (first, created) =
            registry.insert_if_absent(fp, || test_verifier(fp, registry.completion_sender(), deadline));
        assert!(created);

        let (second, created) =
            registry.insert_if_absent(fp, || test_verifier(fp, registry.completion_sender(), deadline));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn lookup_miss_and_hit() {
        let registry = VerifierRegistry::new(MAX_VERIFIER_LIFETIME);
        let fp = fingerprint("/kv.Store/Get", &Plain("key=1"));
        assert!(registry.lookup(fp).is_none());

        let deadline = Instant::now() + Duration::from_secs(60);
        registry.insert_if_absent(fp, || test_verifier(fp, registry.completion_sender(), deadline));
        assert!(registry.lookup(fp).is_some());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = VerifierRegistry::new(MAX_VERIFIER_LIFETIME);
        let fp = fingerprint("/kv.Store/Get", &Plain("key=1"));
        registry.remove(fp);

        let deadline = Instant::now() + Duration::from_secs(60);
        registry.insert_if_absent(fp, || test_verifier(fp, registry.completion_sender(), deadline));
        registry.remove(fp);
        registry.remove(fp);
        assert!(registry.lookup(fp).is_none());
    }

    #[tokio::test]
    async fn completion_signal_evicts_the_entry() {
        let registry = VerifierRegistry::new(MAX_VERIFIER_LIFETIME);
        let fp = fingerprint("/kv.Store/Get", &Plain("key=1"));

        // An already-expired verifier: its worker signals completion at once.
        let deadline = Instant::now() - Duration::from_secs(1);
        registry.insert_if_absent(fp, || test_verifier(fp, registry.completion_sender(), deadline));

        let evicted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if registry.lookup(fp).is_none() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(evicted.is_ok(), "completion signal did not evict the entry");
        assert_eq!(registry.entry_count(), 0);
    }
}
