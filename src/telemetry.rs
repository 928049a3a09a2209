//! Telemetry: metric name constants and the CSV estimation log.
//!
//! Metric names are centralised here. Consumers install their own
//! `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! The CSV sink is the append-only estimation log consumed by offline
//! analysis. Single writer, one row per estimate:
//!
//! ```text
//! timestamp,source,method,estimate
//! 1722600000123456789,client,/kv.Store/Get(1a2b3c4d),12
//! ```
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `munin_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `method` — full RPC method name
//! - `source` — where an estimate was recorded: "client" or "verifier"

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::Result;

/// Total responses observed by the server-side estimator.
///
/// Labels: `method`.
pub const OBSERVATIONS_TOTAL: &str = "munin_observations_total";

/// Total estimates handed to the interceptor layer.
///
/// Labels: `source` ("client" | "verifier").
pub const ESTIMATES_TOTAL: &str = "munin_estimates_total";

/// Total verifiers created in the registry.
pub const VERIFIERS_CREATED_TOTAL: &str = "munin_verifiers_created_total";

/// Total verifiers that reached their expiration deadline.
pub const VERIFIERS_EXPIRED_TOTAL: &str = "munin_verifiers_expired_total";

/// Total client-side response cache hits.
///
/// Labels: `method`.
pub const CACHE_HITS_TOTAL: &str = "munin_cache_hits_total";

/// Total client-side response cache misses.
///
/// Labels: `method`.
pub const CACHE_MISSES_TOTAL: &str = "munin_cache_misses_total";

/// Origin of a CSV estimation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    /// Recorded on the interceptor path, when a response flowed through.
    Client,
    /// Recorded by a verifier's own worker on a scheduled wakeup.
    Verifier,
}

impl EstimateSource {
    fn as_str(self) -> &'static str {
        match self {
            EstimateSource::Client => "client",
            EstimateSource::Verifier => "verifier",
        }
    }
}

/// Append-only CSV estimation log.
///
/// The header row is written at construction. `record` never fails the
/// caller: a write error is logged and the row dropped — telemetry loss
/// must not disturb request handling.
pub struct CsvSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl CsvSink {
    /// Wrap an arbitrary writer. Writes the CSV header immediately.
    pub fn new(mut writer: impl Write + Send + 'static) -> Result<Self> {
        writeln!(writer, "timestamp,source,method,estimate")?;
        Ok(Self {
            writer: Mutex::new(Box::new(writer)),
        })
    }

    /// Open (or create) a CSV file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::new(file)
    }

    /// Append one estimation row.
    pub fn record(&self, source: EstimateSource, label: &str, estimate_secs: u64) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut writer = self.writer.lock().expect("telemetry writer lock poisoned");
        if let Err(error) = writeln!(
            writer,
            "{timestamp},{},{label},{estimate_secs}",
            source.as_str()
        ) {
            warn!(%error, label, "dropping telemetry row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_then_rows() {
        let buf = SharedBuf::default();
        let sink = CsvSink::new(buf.clone()).unwrap();
        sink.record(EstimateSource::Client, "/kv.Store/Get(00000001)", 12);
        sink.record(EstimateSource::Verifier, "/kv.Store/Get(00000001)", 9);

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "timestamp,source,method,estimate");
        assert!(lines[1].ends_with(",client,/kv.Store/Get(00000001),12"));
        assert!(lines[2].ends_with(",verifier,/kv.Store/Get(00000001),9"));
    }
}
